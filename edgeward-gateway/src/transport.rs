//! Upstream transport.
//!
//! The pipeline talks to the management API through [`UpstreamTransport`] so
//! tests can script responses. [`ReqwestTransport`] is the production
//! implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use edgeward_core::{EdgewardError, HttpMethod, UpstreamError};
use reqwest::Client;
use thiserror::Error;

use crate::signer::SignedRequest;

/// Failures below the HTTP status layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {reason}")]
    Connect { reason: String },

    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Failed to read response body: {reason}")]
    Body { reason: String },

    #[error("Failed to build request: {reason}")]
    Build { reason: String },
}

impl From<TransportError> for EdgewardError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { elapsed_ms } => EdgewardError::Timeout {
                operation: "upstream request".to_string(),
                elapsed_ms,
            },
            TransportError::Build { reason } => EdgewardError::internal(reason),
            other => EdgewardError::Upstream(UpstreamError::Transient {
                status: None,
                message: other.to_string(),
            }),
        }
    }
}

/// A raw upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Parsed `Retry-After` header in milliseconds.
    pub retry_after_ms: Option<u64>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after_ms: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after_ms(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends signed requests to the management API.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: &SignedRequest) -> Result<UpstreamResponse, TransportError>;
}

/// HTTPS transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edgeward/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Build {
                reason: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, request: &SignedRequest) -> Result<UpstreamResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                TransportError::Connect {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after_ms(v, chrono::Utc::now()));

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                TransportError::Body {
                    reason: e.to_string(),
                }
            }
        })?;

        Ok(UpstreamResponse {
            status,
            retry_after_ms,
            body: body.to_vec(),
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Parse a `Retry-After` value: delay seconds (fractions allowed) or an
/// HTTP date relative to `now`.
pub fn parse_retry_after_ms(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some((seconds * 1000.0) as u64);
        }
        return None;
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - now;
    Some(delta.num_milliseconds().max(0) as u64)
}
