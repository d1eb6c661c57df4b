//! Error types for Edgeward operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Stable error classification surfaced to the tool-call layer.
///
/// Each kind carries a fixed retryability decision and a remediation hint.
/// The serialized form (`SCREAMING_SNAKE_CASE`) is part of the external
/// contract and must not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Credentials were rejected or have expired
    Authentication,
    /// Tenant is authenticated but lacks permission
    Authorization,
    /// Tenant alias or upstream resource does not exist
    NotFound,
    /// Upstream throttled the request
    RateLimited,
    /// Upstream 5xx or network failure
    TransientUpstream,
    /// Circuit breaker rejected the call without contacting upstream
    CircuitOpen,
    /// Malformed invocation input
    Validation,
    /// A wait exceeded its deadline
    Timeout,
    /// Startup configuration is invalid
    Config,
    /// Internal fault with no fallback
    Internal,
}

impl ErrorKind {
    /// Stable string code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::TransientUpstream => "TRANSIENT_UPSTREAM",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Validation => "VALIDATION",
            Self::Timeout => "TIMEOUT",
            Self::Config => "CONFIG",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the execution pipeline retries errors of this kind locally.
    ///
    /// `CircuitOpen` is deliberately not retried: the breaker is already
    /// shedding load for the endpoint class.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::TransientUpstream | Self::Timeout
        )
    }

    /// Human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::Authentication => {
                "Check the client_token, client_secret and access_token for this tenant and confirm the system clock is accurate"
            }
            Self::Authorization => {
                "Grant the API client access to this resource or use a tenant alias whose credentials have the required role"
            }
            Self::NotFound => {
                "Verify the tenant alias exists in the credential file and that the resource identifier is correct"
            }
            Self::RateLimited => "Reduce request volume or wait for the retry-after interval before trying again",
            Self::TransientUpstream => "The upstream service is degraded; try again shortly",
            Self::CircuitOpen => {
                "Calls to this endpoint class are paused after repeated failures; wait for the cooldown to elapse"
            }
            Self::Validation => "Correct the named field in the invocation parameters",
            Self::Timeout => "The upstream call took too long; try again or raise the timeout",
            Self::Config => "Fix the configuration file or environment variables and restart",
            Self::Internal => "Report this error with the accompanying log output",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTHENTICATION" => Ok(Self::Authentication),
            "AUTHORIZATION" => Ok(Self::Authorization),
            "NOT_FOUND" => Ok(Self::NotFound),
            "RATE_LIMITED" => Ok(Self::RateLimited),
            "TRANSIENT_UPSTREAM" => Ok(Self::TransientUpstream),
            "CIRCUIT_OPEN" => Ok(Self::CircuitOpen),
            "VALIDATION" => Ok(Self::Validation),
            "TIMEOUT" => Ok(Self::Timeout),
            "CONFIG" => Ok(Self::Config),
            "INTERNAL" => Ok(Self::Internal),
            _ => Err(ErrorKindParseError(s.to_string())),
        }
    }
}

/// Error parsing ErrorKind from string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid error kind: {0}")]
pub struct ErrorKindParseError(pub String);

// ============================================================================
// LAYER ERRORS
// ============================================================================

/// Invocation input errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown tool: {tool}")]
    UnknownTool { tool: String },
}

impl ValidationError {
    /// The offending field, when the error names one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::RequiredFieldMissing { field } | Self::InvalidValue { field, .. } => Some(field),
            Self::UnknownTool { .. } => Some("tool"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Duplicate tenant alias: {alias}")]
    DuplicateTenant { alias: String },
}

/// Errors reported by the upstream management API or the transport to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream rejected credentials ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Upstream denied access ({status}): {message}")]
    Authorization { status: u16, message: String },

    #[error("Upstream resource not found ({status}): {message}")]
    NotFound { status: u16, message: String },

    #[error("Upstream rate limited the request (retry after {retry_after_ms:?}ms): {message}")]
    RateLimited {
        retry_after_ms: Option<u64>,
        message: String,
    },

    #[error("Transient upstream failure ({status:?}): {message}")]
    Transient { status: Option<u16>, message: String },

    #[error("Upstream rejected the request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Malformed upstream response: {reason}")]
    InvalidResponse { reason: String },
}

impl UpstreamError {
    /// Classification of this upstream failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient { .. } => ErrorKind::TransientUpstream,
            Self::InvalidRequest { .. } => ErrorKind::Validation,
            Self::InvalidResponse { .. } => ErrorKind::Internal,
        }
    }

    /// Upstream-provided retry hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Cache and coordination storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Cache backend unavailable: {reason}")]
    BackendUnavailable { reason: String },
}

// ============================================================================
// MASTER ERROR
// ============================================================================

/// Master error type for all Edgeward errors.
///
/// `Clone` is required: a coalesced call delivers the same failure to every
/// subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EdgewardError {
    #[error("Unknown tenant alias: {alias}")]
    TenantNotFound { alias: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Circuit open for endpoint class {endpoint_class}")]
    CircuitOpen { endpoint_class: String },

    #[error("Timed out after {elapsed_ms}ms waiting for {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl EdgewardError {
    /// Build an internal error from any displayable reason.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Stable classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TenantNotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Config(_) => ErrorKind::Config,
            Self::Upstream(e) => e.kind(),
            Self::Storage(_) | Self::Internal { .. } => ErrorKind::Internal,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether the pipeline may retry this error.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Convert to the structured form returned to the tool-call layer.
    pub fn to_structured(&self) -> StructuredError {
        let kind = self.kind();
        let field = match self {
            Self::Validation(v) => v.field().map(str::to_string),
            Self::TenantNotFound { .. } => Some("tenant".to_string()),
            _ => None,
        };
        let retry_after_ms = match self {
            Self::Upstream(e) => e.retry_after_ms(),
            _ => None,
        };
        StructuredError {
            kind,
            message: self.to_string(),
            remediation: kind.remediation().to_string(),
            field,
            retry_after_ms,
        }
    }
}

/// Result type alias for Edgeward operations.
pub type EdgewardResult<T> = Result<T, EdgewardError>;

/// Error payload returned by `invoke`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    pub remediation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::TransientUpstream.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::Authorization.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn test_error_kind_roundtrip() {
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::Authorization,
            ErrorKind::NotFound,
            ErrorKind::RateLimited,
            ErrorKind::TransientUpstream,
            ErrorKind::CircuitOpen,
            ErrorKind::Validation,
            ErrorKind::Timeout,
            ErrorKind::Config,
            ErrorKind::Internal,
        ] {
            let parsed: ErrorKind = kind.as_str().parse().unwrap();
            assert_eq!(kind, parsed);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_upstream_error_kinds() {
        let err = UpstreamError::InvalidRequest {
            status: 400,
            message: "bad".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = UpstreamError::RateLimited {
            retry_after_ms: Some(1500),
            message: "slow down".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.retry_after_ms(), Some(1500));
    }

    #[test]
    fn test_structured_validation_error_names_field() {
        let err = EdgewardError::from(ValidationError::RequiredFieldMissing {
            field: "propertyId".to_string(),
        });
        let structured = err.to_structured();
        assert_eq!(structured.kind, ErrorKind::Validation);
        assert_eq!(structured.field.as_deref(), Some("propertyId"));
        assert!(structured.message.contains("propertyId"));
        assert!(!structured.remediation.is_empty());
    }

    #[test]
    fn test_structured_rate_limit_carries_hint() {
        let err = EdgewardError::from(UpstreamError::RateLimited {
            retry_after_ms: Some(2000),
            message: "throttled".to_string(),
        });
        let structured = err.to_structured();
        assert_eq!(structured.kind, ErrorKind::RateLimited);
        assert_eq!(structured.retry_after_ms, Some(2000));

        let json = serde_json::to_value(&structured).unwrap();
        assert_eq!(json["kind"], "RATE_LIMITED");
        assert_eq!(json["retryAfterMs"], 2000);
    }

    #[test]
    fn test_tenant_not_found_is_not_found() {
        let err = EdgewardError::TenantNotFound {
            alias: "ghost".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_edgeward_error_from_variants() {
        let storage = EdgewardError::from(StorageError::BackendUnavailable {
            reason: "closed".to_string(),
        });
        assert!(matches!(storage, EdgewardError::Storage(_)));
        assert_eq!(storage.kind(), ErrorKind::Internal);

        let config = EdgewardError::from(ConfigError::DuplicateTenant {
            alias: "acme".to_string(),
        });
        assert_eq!(config.kind(), ErrorKind::Config);

        let open = EdgewardError::CircuitOpen {
            endpoint_class: "listProperties".to_string(),
        };
        assert_eq!(open.kind(), ErrorKind::CircuitOpen);
        assert!(!open.is_retryable());
    }
}
