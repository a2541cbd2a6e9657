//! Circuit breaker around external capability calls.
//!
//! When a guard's capability fails repeatedly its circuit opens, and the
//! guard reports a defect straight away instead of waiting on the
//! capability again. Once the recovery timeout has passed, calls go through
//! as trials: `success_threshold` trial successes close the circuit, a trial
//! failure opens it again.
//!
//! Every circuit sits behind one `parking_lot::Mutex`, keyed by guard name.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time an open circuit refuses calls
    pub recovery_timeout: Duration,
    /// Trial successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed { failures: 0 }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a call for `guard` may go ahead.
    ///
    /// An open circuit whose recovery timeout has passed turns half-open and
    /// lets the call through.
    pub fn allows(&self, guard: &str) -> bool {
        let mut circuits = self.circuits.lock();
        let Some(state) = circuits.get_mut(guard) else {
            return true;
        };

        if let CircuitState::Open { opened_at } = *state {
            if opened_at.elapsed() < self.config.recovery_timeout {
                return false;
            }
            *state = CircuitState::HalfOpen { successes: 0 };
            tracing::info!(guard, "Circuit half-open, allowing trial calls");
        }
        true
    }

    pub fn record_success(&self, guard: &str) {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(guard.to_string()).or_default();

        *state = match *state {
            CircuitState::HalfOpen { successes } if successes + 1 < self.config.success_threshold => {
                CircuitState::HalfOpen {
                    successes: successes + 1,
                }
            }
            CircuitState::HalfOpen { .. } => {
                tracing::info!(guard, "Circuit closed after successful recovery");
                CircuitState::Closed { failures: 0 }
            }
            CircuitState::Closed { .. } => CircuitState::Closed { failures: 0 },
            open @ CircuitState::Open { .. } => open,
        };
    }

    /// Record a failed or timed-out call.
    pub fn record_failure(&self, guard: &str) {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(guard.to_string()).or_default();

        *state = match *state {
            CircuitState::Closed { failures } if failures + 1 < self.config.failure_threshold => {
                CircuitState::Closed {
                    failures: failures + 1,
                }
            }
            CircuitState::Closed { failures } => {
                tracing::warn!(
                    guard,
                    failures = failures + 1,
                    "Circuit opened after repeated failures"
                );
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            CircuitState::HalfOpen { .. } => {
                tracing::warn!(guard, "Circuit reopened after failed trial call");
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            open @ CircuitState::Open { .. } => open,
        };
    }

    pub fn state(&self, guard: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(guard)
            .copied()
            .unwrap_or_default()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(30),
            success_threshold,
        })
    }

    #[test]
    fn test_unknown_guard_is_closed() {
        let cb = CircuitBreaker::default();
        assert!(cb.allows("moderation"));
        assert_eq!(cb.state("moderation"), CircuitState::Closed { failures: 0 });
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(2, 1);

        cb.record_failure("moderation");
        assert!(cb.allows("moderation"));

        cb.record_failure("moderation");
        assert!(!cb.allows("moderation"));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(3, 1);

        cb.record_failure("moderation");
        cb.record_failure("moderation");
        cb.record_success("moderation");
        cb.record_failure("moderation");

        assert_eq!(cb.state("moderation"), CircuitState::Closed { failures: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let cb = breaker(1, 2);
        cb.record_failure("moderation");

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.allows("moderation"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allows("moderation"));
        assert_eq!(cb.state("moderation"), CircuitState::HalfOpen { successes: 0 });

        cb.record_success("moderation");
        assert_eq!(cb.state("moderation"), CircuitState::HalfOpen { successes: 1 });
        cb.record_success("moderation");
        assert_eq!(cb.state("moderation"), CircuitState::Closed { failures: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = breaker(1, 1);
        cb.record_failure("moderation");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allows("moderation"));
        cb.record_failure("moderation");

        assert!(matches!(cb.state("moderation"), CircuitState::Open { .. }));
        assert!(!cb.allows("moderation"));
    }

    #[test]
    fn test_guards_are_independent() {
        let cb = breaker(1, 1);
        cb.record_failure("moderation");

        assert!(!cb.allows("moderation"));
        assert!(cb.allows("topic"));
    }
}
