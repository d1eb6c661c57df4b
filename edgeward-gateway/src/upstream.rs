//! One upstream call with breaker gating, signing, classification and retry.

use std::sync::Arc;

use edgeward_core::{CredentialSet, EdgewardError, EdgewardResult, EndpointClass, ErrorKind, RetryConfig, UpstreamError};
use serde_json::Value;

use crate::breaker::CircuitBreaker;
use crate::classify::StatusClassifier;
use crate::retry::{RetryDecision, RetryState};
use crate::signer;
use crate::tools::PreparedCall;
use crate::transport::{UpstreamResponse, UpstreamTransport};

/// Decoded response of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub value: Value,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Executes prepared calls against the management API.
///
/// Cheap to clone; clones share the breaker and transport.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn UpstreamTransport>,
    breaker: Arc<CircuitBreaker>,
    classifier: Arc<StatusClassifier>,
    retry: RetryConfig,
}

impl UpstreamClient {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        breaker: Arc<CircuitBreaker>,
        classifier: Arc<StatusClassifier>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            breaker,
            classifier,
            retry,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `call` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// Every attempt passes the breaker gate and is signed afresh. Each
    /// attempt's outcome is reported to the breaker; only transient failures
    /// count against it.
    pub async fn call(
        &self,
        credentials: &CredentialSet,
        call: &PreparedCall,
        class: &EndpointClass,
    ) -> EdgewardResult<CallOutcome> {
        let mut retry = RetryState::new(self.retry.clone());
        loop {
            let attempt = retry.attempt();
            let permit = self.breaker.try_acquire(class)?;

            let result = self.attempt(credentials, call).await;
            match breaker_verdict(&result) {
                Verdict::Success => self.breaker.record_success(&permit),
                Verdict::Failure => self.breaker.record_failure(&permit),
                Verdict::Neutral => self.breaker.record_ignored(&permit),
            }

            let error = match result {
                Ok(value) => return Ok(CallOutcome { value, attempts: attempt }),
                Err(error) => error,
            };

            match retry.on_failure(&error) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        tenant = %credentials.alias(),
                        endpoint_class = %class,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    tracing::debug!(
                        tenant = %credentials.alias(),
                        endpoint_class = %class,
                        attempt,
                        kind = %error.kind(),
                        "Upstream call failed"
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(&self, credentials: &CredentialSet, call: &PreparedCall) -> EdgewardResult<Value> {
        let request = signer::sign_request(credentials, call.method, &call.path, &call.query, call.body.clone())?;
        let response = self.transport.send(&request).await?;
        tracing::debug!(
            tenant = %credentials.alias(),
            method = %call.method,
            path = %call.path,
            status = response.status,
            "Upstream responded"
        );
        if response.is_success() {
            decode_body(&response)
        } else {
            Err(self.classifier.classify(&response).into())
        }
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .finish()
    }
}

enum Verdict {
    Success,
    Failure,
    Neutral,
}

/// How an attempt's outcome affects the breaker.
///
/// Transient failures and timeouts count as failures. Any other upstream
/// answer proves the endpoint is up. Throttling and local faults say
/// nothing either way.
fn breaker_verdict(result: &EdgewardResult<Value>) -> Verdict {
    match result {
        Ok(_) => Verdict::Success,
        Err(e) => match e.kind() {
            ErrorKind::TransientUpstream | ErrorKind::Timeout => Verdict::Failure,
            ErrorKind::RateLimited => Verdict::Neutral,
            ErrorKind::Authentication | ErrorKind::Authorization | ErrorKind::NotFound | ErrorKind::Validation => {
                Verdict::Success
            }
            _ => match e {
                EdgewardError::Upstream(UpstreamError::InvalidResponse { .. }) => Verdict::Success,
                _ => Verdict::Neutral,
            },
        },
    }
}

fn decode_body(response: &UpstreamResponse) -> EdgewardResult<Value> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&response.body).map_err(|e| {
        UpstreamError::InvalidResponse {
            reason: format!("response body is not JSON: {}", e),
        }
        .into()
    })
}
