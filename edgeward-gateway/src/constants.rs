//! Constants for the Edgeward gateway
//!
//! Default values for every tunable, named after the environment variable
//! that overrides them.

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Default credential file, relative to the user's home directory
pub const DEFAULT_EDGERC_FILE: &str = ".edgerc";

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures that open a breaker
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Seconds an open breaker waits before admitting a probe
pub const DEFAULT_CIRCUIT_COOLDOWN_SECS: u64 = 30;

// ============================================================================
// RETRY
// ============================================================================

/// Total attempts per upstream call, including the first
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry in milliseconds
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Upper bound on any single retry delay in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5000;

// ============================================================================
// CACHE
// ============================================================================

/// Maximum number of cached responses before eviction
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Interval of the background expiry sweep in seconds
pub const DEFAULT_CACHE_SWEEP_SECS: u64 = 30;

/// TTL for collection endpoints in seconds
pub const DEFAULT_TTL_LIST_SECS: u64 = 60;

/// TTL for single-resource endpoints in seconds (5 minutes)
pub const DEFAULT_TTL_DETAIL_SECS: u64 = 300;

/// TTL for reference data in seconds (1 hour)
pub const DEFAULT_TTL_REFERENCE_SECS: u64 = 3600;

// ============================================================================
// IDENTIFIER TRANSLATION
// ============================================================================

/// TTL for resolved display names in seconds (1 hour)
pub const DEFAULT_NAME_CACHE_TTL_SECS: u64 = 3600;

/// TTL for identifiers that failed to resolve in seconds
pub const DEFAULT_NAME_NEGATIVE_TTL_SECS: u64 = 60;

// ============================================================================
// UPSTREAM
// ============================================================================

/// Per-request upstream timeout in seconds
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Longest a caller waits on one read invocation in seconds
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 120;

/// Bytes of a request body covered by the content hash
pub const MAX_SIGNED_BODY_BYTES: usize = 131_072;

/// Longest upstream error body quoted in an error message
pub const MAX_ERROR_BODY_CHARS: usize = 512;

// ============================================================================
// LOGGING
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "edgeward_gateway=info,edgeward_storage=info,warn";
