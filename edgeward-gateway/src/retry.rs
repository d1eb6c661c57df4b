//! Retry state machine for upstream calls.

use std::time::Duration;

use edgeward_core::{EdgewardError, RetryConfig};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then attempt again.
    Retry { delay: Duration },
    /// Surface the error.
    GiveUp,
}

/// Per-call retry state: current attempt and the next backoff delay.
#[derive(Debug, Clone)]
pub struct RetryState {
    config: RetryConfig,
    attempt: u32,
    next_delay: Duration,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        let next_delay = config.initial_backoff;
        Self {
            config,
            attempt: 1,
            next_delay,
        }
    }

    /// 1-based number of the attempt in progress.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Backoff delay the next retry would use without an upstream hint.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Advance after a failed attempt.
    ///
    /// Only retryable kinds are retried. An upstream retry hint replaces the
    /// computed backoff; a hint longer than `max_backoff` ends the retries
    /// rather than retrying early into the same throttle.
    pub fn on_failure(&mut self, error: &EdgewardError) -> RetryDecision {
        if !error.is_retryable() || self.attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        let hint_ms = match error {
            EdgewardError::Upstream(e) => e.retry_after_ms(),
            _ => None,
        };
        let delay = match hint_ms {
            Some(hint_ms) => {
                let hint = Duration::from_millis(hint_ms);
                if hint > self.config.max_backoff {
                    return RetryDecision::GiveUp;
                }
                hint
            }
            None => self.next_delay.min(self.config.max_backoff),
        };

        self.attempt += 1;
        self.next_delay = self
            .next_delay
            .mul_f64(self.config.backoff_multiplier)
            .min(self.config.max_backoff);

        RetryDecision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeward_core::{UpstreamError, ValidationError};

    fn transient() -> EdgewardError {
        UpstreamError::Transient {
            status: Some(503),
            message: "unavailable".to_string(),
        }
        .into()
    }

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let mut state = RetryState::new(config());
        assert_eq!(
            state.on_failure(&transient()),
            RetryDecision::Retry { delay: Duration::from_millis(100) }
        );
        assert_eq!(
            state.on_failure(&transient()),
            RetryDecision::Retry { delay: Duration::from_millis(200) }
        );
        assert_eq!(
            state.on_failure(&transient()),
            RetryDecision::Retry { delay: Duration::from_millis(250) }
        );
        assert_eq!(state.attempt(), 4);
        assert_eq!(state.on_failure(&transient()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_fatal_errors_never_retry() {
        let mut state = RetryState::new(config());
        let err = EdgewardError::from(ValidationError::RequiredFieldMissing {
            field: "propertyId".to_string(),
        });
        assert_eq!(state.on_failure(&err), RetryDecision::GiveUp);

        let err = EdgewardError::CircuitOpen {
            endpoint_class: "listProperties".to_string(),
        };
        assert_eq!(state.on_failure(&err), RetryDecision::GiveUp);
        assert_eq!(state.attempt(), 1);
    }

    #[test]
    fn test_retry_after_hint_is_honored() {
        let mut state = RetryState::new(config());
        let err = EdgewardError::from(UpstreamError::RateLimited {
            retry_after_ms: Some(180),
            message: "throttled".to_string(),
        });
        assert_eq!(
            state.on_failure(&err),
            RetryDecision::Retry { delay: Duration::from_millis(180) }
        );
    }

    #[test]
    fn test_hint_beyond_cap_gives_up() {
        let mut state = RetryState::new(config());
        let err = EdgewardError::from(UpstreamError::RateLimited {
            retry_after_ms: Some(60_000),
            message: "throttled".to_string(),
        });
        assert_eq!(state.on_failure(&err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_no_retry_policy() {
        let mut state = RetryState::new(RetryConfig::no_retry());
        assert_eq!(state.on_failure(&transient()), RetryDecision::GiveUp);
    }
}
