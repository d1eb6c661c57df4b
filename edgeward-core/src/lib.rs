//! Edgeward Core - Shared Types
//!
//! Pure data structures shared by the storage and gateway crates: tenant
//! aliases, endpoint classes, resource kinds, HTTP methods, cache classes,
//! credential sets and the error taxonomy. This crate performs no I/O.

use serde::{Deserialize, Serialize};

pub mod config;
pub mod credentials;
pub mod error;

pub use config::{RetryConfig, TtlTable};
pub use credentials::CredentialSet;
pub use error::{
    ConfigError, EdgewardError, EdgewardResult, ErrorKind, StorageError, StructuredError,
    UpstreamError, ValidationError,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Characters that may not appear in a tenant alias.
///
/// `:` separates the alias from the rest of a cache key and `*` is the
/// wildcard in invalidation patterns; allowing either would let one tenant's
/// keys collide with another's.
const RESERVED_ALIAS_CHARS: [char; 2] = [':', '*'];

/// Name of a tenant whose credentials and cached data are isolated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantAlias(String);

impl TenantAlias {
    /// Validate and wrap an alias.
    pub fn new(alias: impl Into<String>) -> Result<Self, ValidationError> {
        let alias = alias.into();
        let trimmed = alias.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tenant".to_string(),
            });
        }
        if trimmed
            .chars()
            .any(|c| RESERVED_ALIAS_CHARS.contains(&c) || c.is_whitespace())
        {
            return Err(ValidationError::InvalidValue {
                field: "tenant".to_string(),
                reason: format!("alias '{}' contains a reserved character", trimmed),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TenantAlias {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TenantAlias::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Group of upstream endpoints sharing one circuit breaker, e.g. `listProperties`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointClass(String);

impl EndpointClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of upstream resource, e.g. `property`, `contract`, `group`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// HTTP method of an upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Write-class methods are never cached or coalesced and trigger tag
    /// invalidation on success.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache class of a read-class tool; determines the TTL of its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtlClass {
    /// Collection endpoints; short TTL
    List,
    /// Single-resource endpoints
    #[default]
    Detail,
    /// Static reference data; long TTL
    Reference,
    /// Never cached
    None,
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
