//! Per-endpoint-class circuit breaker.
//!
//! Each [`EndpointClass`] has its own state machine:
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(cooldown)--> HalfOpen
//!    ^                                  ^                     |
//!    |                                  +----(probe fails)----+
//!    +-----------------(probe succeeds)-----------------------+
//! ```
//!
//! Half-open admits exactly one probe. A probe that never reports back is
//! presumed lost after one further cooldown and another probe is admitted.
//!
//! Every admitted call holds a [`BreakerPermit`]. A probe permit carries the
//! generation it was issued under; while half-open only the permit of the
//! current generation can close or reopen the breaker. Calls admitted while
//! closed, and probes that were given up as lost, are ignored there.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use edgeward_core::{EdgewardError, EndpointClass};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::constants::{DEFAULT_CIRCUIT_COOLDOWN_SECS, DEFAULT_CIRCUIT_FAILURE_THRESHOLD};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "edgeward_core::config::duration_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_CIRCUIT_COOLDOWN_SECS),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time since the breaker last opened, while open or half-open.
    pub open_for: Option<Duration>,
}

/// Admission handed out by [`CircuitBreaker::allow`]; the outcome of the
/// call is reported back with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerPermit {
    class: EndpointClass,
    probe: Option<u64>,
}

impl BreakerPermit {
    pub fn endpoint_class(&self) -> &EndpointClass {
        &self.class
    }

    /// Whether this call was admitted as the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
    probe_generation: Option<u64>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_started: None,
            probe_generation: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started = None;
        self.probe_generation = None;
    }

    fn holds_probe(&self, permit: &BreakerPermit) -> bool {
        permit.probe.is_some() && permit.probe == self.probe_generation
    }
}

/// Circuit breakers for every endpoint class.
///
/// State lives in a sharded map; each transition happens under the shard
/// lock of its endpoint class, so two callers can never both take the
/// half-open probe.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<EndpointClass, BreakerState>,
    generations: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admit a call to `class`, or `None` when it may not proceed.
    ///
    /// The permit must be reported back through [`record_success`],
    /// [`record_failure`] or [`record_ignored`].
    ///
    /// [`record_success`]: Self::record_success
    /// [`record_failure`]: Self::record_failure
    /// [`record_ignored`]: Self::record_ignored
    pub fn allow(&self, class: &EndpointClass) -> Option<BreakerPermit> {
        let now = Instant::now();
        let mut entry = self
            .states
            .entry(class.clone())
            .or_insert_with(BreakerState::closed);
        let state = entry.value_mut();

        let probe = match state.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.config.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return None;
                }
                state.state = CircuitState::HalfOpen;
                tracing::info!(endpoint_class = %class, "Circuit half-open, admitting probe");
                Some(self.issue_probe(state, now))
            }
            CircuitState::HalfOpen => match state.probe_started {
                Some(started) if now.duration_since(started) < self.config.cooldown => return None,
                Some(_) => {
                    tracing::warn!(endpoint_class = %class, "Circuit probe lost, admitting another");
                    Some(self.issue_probe(state, now))
                }
                None => Some(self.issue_probe(state, now)),
            },
        };

        Some(BreakerPermit {
            class: class.clone(),
            probe,
        })
    }

    fn issue_probe(&self, state: &mut BreakerState, now: Instant) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        state.probe_started = Some(now);
        state.probe_generation = Some(generation);
        generation
    }

    /// Gate a call, returning `CircuitOpen` when it may not proceed.
    pub fn try_acquire(&self, class: &EndpointClass) -> Result<BreakerPermit, EdgewardError> {
        self.allow(class).ok_or_else(|| EdgewardError::CircuitOpen {
            endpoint_class: class.to_string(),
        })
    }

    pub fn record_success(&self, permit: &BreakerPermit) {
        let class = &permit.class;
        let Some(mut entry) = self.states.get_mut(class) else {
            return;
        };
        let state = entry.value_mut();
        match state.state {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen if state.holds_probe(permit) => {
                tracing::info!(endpoint_class = %class, "Circuit closed after successful probe");
                *state = BreakerState::closed();
            }
            // Admitted before the breaker opened, or a probe already given
            // up as lost; the current probe decides.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, permit: &BreakerPermit) {
        let class = &permit.class;
        let now = Instant::now();
        let mut entry = self
            .states
            .entry(class.clone())
            .or_insert_with(BreakerState::closed);
        let state = entry.value_mut();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        endpoint_class = %class,
                        failures = state.consecutive_failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit opened"
                    );
                    state.open(now);
                }
            }
            CircuitState::HalfOpen if state.holds_probe(permit) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                tracing::warn!(endpoint_class = %class, "Circuit probe failed, reopening");
                state.open(now);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Report an admitted call whose outcome says nothing about upstream
    /// health. A probe permit frees the half-open slot without changing state.
    pub fn record_ignored(&self, permit: &BreakerPermit) {
        if let Some(mut entry) = self.states.get_mut(&permit.class) {
            if entry.state == CircuitState::HalfOpen && entry.holds_probe(permit) {
                entry.probe_started = None;
                entry.probe_generation = None;
            }
        }
    }

    pub fn state(&self, class: &EndpointClass) -> BreakerSnapshot {
        let now = Instant::now();
        match self.states.get(class) {
            Some(entry) => BreakerSnapshot {
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                open_for: match entry.state {
                    CircuitState::Closed => None,
                    _ => entry.opened_at.map(|at| now.duration_since(at)),
                },
            },
            None => BreakerSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                open_for: None,
            },
        }
    }

    /// Force an endpoint class back to closed.
    pub fn reset(&self, class: &EndpointClass) {
        self.states.remove(class);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("tracked_classes", &self.states.len())
            .finish()
    }
}
