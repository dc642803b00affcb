//! Per-upstream circuit breaker (C4, spec §4.4).

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerConfig, BreakerPhase, CircuitBreaker, TransitionListener};
