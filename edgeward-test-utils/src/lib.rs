//! Edgeward Test Utilities
//!
//! Shared test infrastructure for the Edgeward workspace:
//! - Scripted mock transport recording every signed request
//! - A cache backend that always fails, for fallback tests
//! - Fixtures for credentials, tools and pipelines
//! - Proptest generators for core types
//! - Assertions on structured errors

pub use edgeward_core::{
    CredentialSet, EdgewardError, EdgewardResult, EndpointClass, ErrorKind, HttpMethod, ResourceKind,
    RetryConfig, StorageError, StructuredError, TenantAlias, TtlClass,
};
pub use edgeward_gateway::{
    CircuitBreaker, CircuitBreakerConfig, CredentialStore, ExecutionPipeline, SignedRequest, StatusClassifier,
    ToolDescriptor, ToolRegistry, TransportError, UpstreamClient, UpstreamResponse, UpstreamTransport,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(UpstreamResponse),
    Error(TransportError),
}

impl MockReply {
    /// `200` with a JSON body.
    pub fn json(value: Value) -> Self {
        Self::Response(UpstreamResponse::new(200, value.to_string().into_bytes()))
    }

    /// Bare status with an empty body.
    pub fn status(status: u16) -> Self {
        Self::Response(UpstreamResponse::new(status, Vec::new()))
    }

    /// `429` carrying a retry hint.
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::Response(UpstreamResponse::new(429, Vec::new()).with_retry_after_ms(retry_after_ms))
    }
}

/// Scripted [`UpstreamTransport`].
///
/// Replies are queued per `METHOD /path` route (query excluded). The last
/// reply of a route repeats once the queue is down to one. Requests on an
/// unscripted route get the fallback reply (`200 {}` unless replaced).
#[derive(Debug)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    fallback: Mutex<MockReply>,
    requests: Mutex<Vec<SignedRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            fallback: Mutex::new(MockReply::json(Value::Object(Default::default()))),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Hold every reply for `delay` before returning it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply for a route.
    pub fn reply(&self, method: HttpMethod, path: &str, reply: MockReply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(route(method, path))
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a sequence of replies for a route.
    pub fn replies(&self, method: HttpMethod, path: &str, replies: impl IntoIterator<Item = MockReply>) -> &Self {
        for reply in replies {
            self.reply(method, path, reply);
        }
        self
    }

    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock().unwrap() = reply;
    }

    /// Total requests received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received on one route.
    pub fn calls_to(&self, method: HttpMethod, path: &str) -> usize {
        let wanted = route(method, path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| route(r.method, strip_query(&r.path)) == wanted)
            .count()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<SignedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<SignedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn next_reply(&self, request: &SignedRequest) -> MockReply {
        let key = route(request.method, strip_query(&request.path));
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => self.fallback.lock().unwrap().clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamTransport for MockTransport {
    async fn send(&self, request: &SignedRequest) -> Result<UpstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.next_reply(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            MockReply::Response(response) => Ok(response),
            MockReply::Error(error) => Err(error),
        }
    }
}

fn route(method: HttpMethod, path: &str) -> String {
    format!("{} {}", method, path)
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map(|(p, _)| p).unwrap_or(path)
}

// ============================================================================
// FAILING CACHE BACKEND
// ============================================================================

/// Cache backend whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingCacheBackend;

fn unavailable<T>() -> EdgewardResult<T> {
    Err(StorageError::BackendUnavailable {
        reason: "cache backend offline".to_string(),
    }
    .into())
}

#[async_trait]
impl edgeward_storage::CacheBackend for FailingCacheBackend {
    async fn get(&self, _key: &str) -> EdgewardResult<Option<edgeward_storage::CacheEntry>> {
        unavailable()
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration, _tags: &[String]) -> EdgewardResult<()> {
        unavailable()
    }

    async fn delete(&self, _key: &str) -> EdgewardResult<bool> {
        unavailable()
    }

    async fn invalidate_by_tag(&self, _tag: &str) -> EdgewardResult<u64> {
        unavailable()
    }

    async fn scan_and_delete(&self, _pattern: &str) -> EdgewardResult<u64> {
        unavailable()
    }

    async fn purge_expired(&self) -> EdgewardResult<u64> {
        unavailable()
    }

    async fn stats(&self) -> EdgewardResult<edgeward_storage::CacheStats> {
        unavailable()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Edgeward types.

    use super::*;
    use proptest::prelude::*;

    /// Valid tenant alias.
    pub fn arb_tenant_alias() -> impl Strategy<Value = TenantAlias> {
        "[a-z][a-z0-9_-]{0,15}".prop_map(|s| TenantAlias::new(s).unwrap())
    }

    pub fn arb_http_method() -> impl Strategy<Value = HttpMethod> {
        prop_oneof![
            Just(HttpMethod::Get),
            Just(HttpMethod::Head),
            Just(HttpMethod::Post),
            Just(HttpMethod::Put),
            Just(HttpMethod::Patch),
            Just(HttpMethod::Delete),
        ]
    }

    /// Absolute API path such as `/papi/v1/properties`.
    pub fn arb_api_path() -> impl Strategy<Value = String> {
        proptest::collection::vec("[a-z0-9_]{1,10}", 1..5).prop_map(|segments| format!("/{}", segments.join("/")))
    }

    /// Query pairs with unique names. Values may hold query delimiters.
    pub fn arb_query() -> impl Strategy<Value = Vec<(String, String)>> {
        proptest::collection::btree_map("[a-zA-Z]{1,8}", "[a-zA-Z0-9_&=%/ ]{0,12}", 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    pub fn arb_credential_set() -> impl Strategy<Value = CredentialSet> {
        (
            arb_tenant_alias(),
            "[a-z0-9]{4,12}",
            "akab-[a-z0-9]{8,16}",
            "[A-Za-z0-9+/]{16,44}",
            "akab-[a-z0-9]{8,16}",
            proptest::option::of("[A-Z0-9]{1,6}:[A-Z0-9]{1,6}"),
        )
            .prop_map(|(alias, host, client_token, secret, access_token, switch_key)| {
                CredentialSet::new(
                    alias,
                    format!("akab-{}.luna.akamaiapis.net", host),
                    client_token,
                    secret,
                    access_token,
                    switch_key,
                )
                .unwrap()
            })
    }

    /// JSON bodies of modest size.
    pub fn arb_json_body() -> impl Strategy<Value = Value> {
        proptest::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 0..6).prop_map(|m| {
            Value::Object(m.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Two-tenant `.edgerc` file.
    pub const SAMPLE_EDGERC: &str = "\
[acme]
host = akab-acme.luna.akamaiapis.net
client_token = akab-client-acme
client_secret = c2VjcmV0LWFjbWU=
access_token = akab-access-acme

[globex]
host = https://akab-globex.luna.akamaiapis.net/
client_token = akab-client-globex
client_secret = c2VjcmV0LWdsb2JleA==
access_token = akab-access-globex
account_key = B-C-1ABCD:1-2RBL
";

    pub fn tenant(alias: &str) -> TenantAlias {
        TenantAlias::new(alias).unwrap()
    }

    /// Credential set on a test host for `alias`.
    pub fn credential_set(alias: &str) -> CredentialSet {
        CredentialSet::new(
            tenant(alias),
            format!("akab-{}.luna.akamaiapis.net", alias),
            format!("akab-client-{}", alias),
            format!("secret-{}", alias),
            format!("akab-access-{}", alias),
            None,
        )
        .unwrap()
    }

    pub fn credential_store(aliases: &[&str]) -> CredentialStore {
        CredentialStore::new(aliases.iter().map(|a| credential_set(a))).unwrap()
    }

    fn tool(name: &str, method: HttpMethod, path: &str, kind: &str, ttl_class: TtlClass) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            method,
            path: path.to_string(),
            resource_kind: ResourceKind::new(kind),
            endpoint_class: None,
            ttl_class,
            tags: Vec::new(),
            invalidates: Vec::new(),
            required_query: Vec::new(),
            translations: Vec::new(),
        }
    }

    /// Read tool with a list TTL.
    pub fn list_tool(name: &str, path: &str, kind: &str, tags: &[&str]) -> ToolDescriptor {
        ToolDescriptor {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..tool(name, HttpMethod::Get, path, kind, TtlClass::List)
        }
    }

    /// Read tool with a detail TTL.
    pub fn detail_tool(name: &str, path: &str, kind: &str, tags: &[&str]) -> ToolDescriptor {
        ToolDescriptor {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..tool(name, HttpMethod::Get, path, kind, TtlClass::Detail)
        }
    }

    /// Write tool invalidating `invalidates`.
    pub fn mutation_tool(
        name: &str,
        method: HttpMethod,
        path: &str,
        kind: &str,
        invalidates: &[&str],
    ) -> ToolDescriptor {
        ToolDescriptor {
            invalidates: invalidates.iter().map(|t| t.to_string()).collect(),
            ..tool(name, method, path, kind, TtlClass::None)
        }
    }

    /// Small property/group catalog used across integration tests.
    pub fn property_tools() -> Vec<ToolDescriptor> {
        vec![
            list_tool("listProperties", "/papi/v1/properties", "property", &["properties"]),
            detail_tool(
                "getProperty",
                "/papi/v1/properties/{propertyId}",
                "property",
                &["properties", "property:{propertyId}"],
            ),
            mutation_tool(
                "updateProperty",
                HttpMethod::Put,
                "/papi/v1/properties/{propertyId}",
                "property",
                &["properties", "property:{propertyId}"],
            ),
            list_tool("listGroups", "/papi/v1/groups", "group", &["groups"]),
        ]
    }

    /// Upstream client over `transport` with the given breaker and retry policy.
    pub fn upstream_client(
        transport: Arc<dyn UpstreamTransport>,
        breaker: CircuitBreakerConfig,
        retry: RetryConfig,
    ) -> UpstreamClient {
        UpstreamClient::new(
            transport,
            Arc::new(CircuitBreaker::new(breaker)),
            Arc::new(StatusClassifier::new()),
            retry,
        )
    }

    /// Pipeline for tenant `acme` and `globex` over an in-memory cache.
    pub fn pipeline(transport: Arc<dyn UpstreamTransport>, tools: Vec<ToolDescriptor>) -> ExecutionPipeline {
        pipeline_with(transport, tools, CircuitBreakerConfig::default(), RetryConfig::no_retry())
    }

    pub fn pipeline_with(
        transport: Arc<dyn UpstreamTransport>,
        tools: Vec<ToolDescriptor>,
        breaker: CircuitBreakerConfig,
        retry: RetryConfig,
    ) -> ExecutionPipeline {
        ExecutionPipeline::new(
            credential_store(&["acme", "globex"]),
            ToolRegistry::new(tools).unwrap(),
            edgeward_storage::SmartCache::new(Arc::new(edgeward_storage::InMemoryCacheBackend::new())),
            upstream_client(transport, breaker, retry),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on invocation failures.

    use super::*;

    /// Assert a structured error of `kind`.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &Result<T, StructuredError>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind, kind, "wrong error kind: {:?}", e),
            Ok(v) => panic!("Expected {} error, got Ok: {:?}", kind, v),
        }
    }

    /// Assert an [`EdgewardError`] of `kind`.
    #[track_caller]
    pub fn assert_error_kind<T: std::fmt::Debug>(result: &EdgewardResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "wrong error kind: {:?}", e),
            Ok(v) => panic!("Expected {} error, got Ok: {:?}", kind, v),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
