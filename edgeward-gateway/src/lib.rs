//! Edgeward Gateway
//!
//! Executes tool invocations against a credential-scoped management API.
//! Every call is resolved to a tenant, signed, served from the tenant's
//! cache where possible, coalesced with identical concurrent calls and gated
//! by a per-endpoint circuit breaker. Responses can be enriched with display
//! names for the identifiers they contain.
//!
//! The entry point is [`ExecutionPipeline`]; the `edgeward` binary exposes
//! it over stdio as newline-delimited JSON.

pub mod breaker;
pub mod classify;
pub mod coalescer;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod pipeline;
pub mod retry;
pub mod signer;
pub mod telemetry;
pub mod tools;
pub mod translator;
pub mod transport;
pub mod upstream;

pub use breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classify::StatusClassifier;
pub use coalescer::{CoalesceRole, CoalescerStats, RequestCoalescer};
pub use config::GatewayConfig;
pub use credentials::CredentialStore;
pub use pipeline::{CacheStatus, ExecutionPipeline, Invocation, InvocationResult};
pub use retry::{RetryDecision, RetryState};
pub use signer::{sign, sign_request, sign_request_with, SignedRequest, SigningContext, SigningError};
pub use telemetry::{init_tracing, LogFormat};
pub use tools::{PreparedCall, ToolDescriptor, ToolRegistry};
pub use translator::{
    IdentifierTranslator, LookupInvoker, LookupResolver, LookupResolverConfig, PathPattern, Resolver,
    StaticResolver, TranslationMapping,
};
pub use transport::{ReqwestTransport, TransportError, UpstreamResponse, UpstreamTransport};
pub use upstream::{CallOutcome, UpstreamClient};
