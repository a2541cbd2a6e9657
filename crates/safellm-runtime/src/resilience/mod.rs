//! Resilience patterns for safellm-runtime.
//!
//! A per-guard circuit breaker that stops calling an external
//! capability after repeated failures.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
