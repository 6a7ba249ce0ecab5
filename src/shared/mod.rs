//! Resilience primitives shared across the manager: the status record, the
//! backoff policy, and the circuit breaker.

pub mod backoff;
pub mod breaker;
pub mod logging;
pub mod status;

pub use backoff::{retry, BackoffConfig, RetryError};
pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Counts, StateChangeCallback,
};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use status::Status;
