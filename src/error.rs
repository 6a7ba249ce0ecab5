//! Error types for the connection lifecycle manager.
//!
//! This module provides a comprehensive error type that covers all possible
//! failure modes in connection management, from state machine violations to
//! circuit breaker fast-fails.

use crate::types::ConnectionState;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for connection management operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for connection management operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A state transition not permitted by the connection state machine.
    #[error("connection {router_id}: invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Router whose status rejected the transition
        router_id: String,
        /// State the connection was in
        from: ConnectionState,
        /// State the caller asked for
        to: ConnectionState,
        /// Why the edge is not in the transition table
        reason: &'static str,
    },

    /// No connection is registered for the given router.
    #[error("connection not found for router {0}")]
    NotFound(String),

    /// The manager has been closed and accepts no further operations.
    #[error("manager is closed")]
    ManagerClosed,

    /// The circuit breaker is open and the call was rejected without
    /// invoking the wrapped operation.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// A user-initiated reconnect arrived inside the rate-limit window.
    #[error("reconnection rate limited, wait {0:?}")]
    RateLimited(Duration),

    /// The connection pool is at capacity.
    #[error("connection pool limit reached ({0})")]
    PoolExhausted(usize),

    /// The client factory failed to produce a client.
    #[error("failed to create client: {0}")]
    ClientCreate(String),

    /// The client failed to establish its transport.
    #[error("failed to connect: {0}")]
    ClientConnect(String),

    /// A health check ping failed.
    #[error("ping failed: {0}")]
    Ping(String),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Timeout errors
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Cancelled operation
    #[error("operation cancelled")]
    Cancelled,

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a not-found error for a router id.
    pub fn not_found(router_id: impl Into<String>) -> Self {
        Self::NotFound(router_id.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a client-creation failure.
    pub fn client_create(source: impl std::fmt::Display) -> Self {
        Self::ClientCreate(source.to_string())
    }

    /// Wrap a client-connect failure.
    pub fn client_connect(source: impl std::fmt::Display) -> Self {
        Self::ClientConnect(source.to_string())
    }

    /// Wrap a health-check ping failure.
    pub fn ping(source: impl std::fmt::Display) -> Self {
        Self::Ping(source.to_string())
    }

    /// Create a timeout error from an elapsed duration budget.
    pub fn timeout(budget: Duration) -> Self {
        Self::Timeout(u64::try_from(budget.as_millis()).unwrap_or(u64::MAX))
    }

    /// Whether this is the circuit breaker's fast-fail sentinel.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// Whether this error came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_format() {
        let err = Error::InvalidTransition {
            router_id: "router-1".to_string(),
            from: ConnectionState::Disconnected,
            to: ConnectionState::Connected,
            reason: "must go through CONNECTING",
        };
        assert_eq!(
            err.to_string(),
            "connection router-1: invalid transition from disconnected to connected: must go through CONNECTING"
        );
    }

    #[test]
    fn error_predicates() {
        assert!(Error::CircuitOpen.is_circuit_open());
        assert!(!Error::Cancelled.is_circuit_open());
        assert!(Error::Cancelled.is_cancelled());

        let err = Error::not_found("r9");
        assert_eq!(err.to_string(), "connection not found for router r9");
    }

    #[test]
    fn timeout_from_duration() {
        let err = Error::timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "operation timed out after 5000ms");
    }
}
