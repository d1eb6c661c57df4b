//! Upstream status classification.
//!
//! Maps a non-success HTTP response to an [`UpstreamError`] whose kind
//! decides retryability. The default table can be overridden per status code.

use std::collections::HashMap;

use edgeward_core::{ConfigError, ErrorKind, UpstreamError};

use crate::constants::MAX_ERROR_BODY_CHARS;
use crate::transport::UpstreamResponse;

/// Status code to error kind table.
#[derive(Debug, Clone, Default)]
pub struct StatusClassifier {
    overrides: HashMap<u16, ErrorKind>,
}

impl StatusClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier with per-status overrides.
    ///
    /// Only kinds an upstream response can carry are accepted.
    pub fn with_overrides(overrides: HashMap<u16, ErrorKind>) -> Result<Self, ConfigError> {
        for (status, kind) in &overrides {
            if !(400..600).contains(status) {
                return Err(ConfigError::InvalidValue {
                    field: "status_overrides".to_string(),
                    value: status.to_string(),
                    reason: "only 4xx and 5xx statuses can be classified".to_string(),
                });
            }
            if !matches!(
                kind,
                ErrorKind::Authentication
                    | ErrorKind::Authorization
                    | ErrorKind::NotFound
                    | ErrorKind::RateLimited
                    | ErrorKind::TransientUpstream
                    | ErrorKind::Validation
            ) {
                return Err(ConfigError::InvalidValue {
                    field: format!("status_overrides.{}", status),
                    value: kind.to_string(),
                    reason: "kind cannot describe an upstream response".to_string(),
                });
            }
        }
        Ok(Self { overrides })
    }

    /// Kind assigned to a status code.
    pub fn kind_for(&self, status: u16) -> ErrorKind {
        if let Some(kind) = self.overrides.get(&status) {
            return *kind;
        }
        match status {
            400 | 422 => ErrorKind::Validation,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 | 410 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::TransientUpstream,
            _ => ErrorKind::Validation,
        }
    }

    /// Classify a non-success response.
    pub fn classify(&self, response: &UpstreamResponse) -> UpstreamError {
        let status = response.status;
        let message = error_message(&response.body);
        match self.kind_for(status) {
            ErrorKind::Authentication => UpstreamError::Authentication { status, message },
            ErrorKind::Authorization => UpstreamError::Authorization { status, message },
            ErrorKind::NotFound => UpstreamError::NotFound { status, message },
            ErrorKind::RateLimited => UpstreamError::RateLimited {
                retry_after_ms: response.retry_after_ms,
                message,
            },
            ErrorKind::TransientUpstream => UpstreamError::Transient {
                status: Some(status),
                message,
            },
            _ => UpstreamError::InvalidRequest { status, message },
        }
    }
}

/// Human-readable message from an error body.
///
/// Problem-details bodies (`detail` / `title`) are preferred; anything else
/// is quoted, truncated.
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for field in ["detail", "title", "message"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "no response body".to_string();
    }
    text.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
