//! # Resilience
//!
//! Fault tolerance for the report data dependency. The circuit breaker
//! isolates a failing database so repeated report requests cannot pile onto
//! it, and gives it a cool-down window before recovery probing resumes.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
