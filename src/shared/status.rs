//! Per-connection status record and state machine enforcement.

use crate::error::{Error, Result};
use crate::shared::breaker::CircuitState;
use crate::types::{ConnectionState, DisconnectReason, ExternalState, Protocol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything the manager knows about one connection.
///
/// A `Status` is owned by its connection and mutated only under the
/// connection's write lock; readers always receive a by-value copy. The
/// `set_*` methods enforce the [`ConnectionState`] transition table and leave
/// the record untouched when a transition is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Router this record belongs to.
    pub router_id: String,

    /// Current state machine position.
    pub state: ConnectionState,

    /// Protocol of the current (or last) client.
    pub protocol: Option<Protocol>,

    /// User hint for protocol selection.
    pub preferred_protocol: Option<Protocol>,

    /// Router software version reported by the client.
    pub version: String,

    /// Set exactly while the state is `Connected`.
    pub connected_at: Option<DateTime<Utc>>,

    /// When the connection last went down.
    pub disconnected_at: Option<DateTime<Utc>>,

    /// When the last error was recorded.
    pub last_error_time: Option<DateTime<Utc>>,

    /// When the health supervisor last ran a check.
    pub last_health_check: Option<DateTime<Utc>>,

    /// When the next reconnect attempt is scheduled.
    pub next_reconnect_at: Option<DateTime<Utc>>,

    /// Message of the last error, empty when none.
    pub last_error: String,

    /// Why the connection last went down.
    pub disconnect_reason: DisconnectReason,

    /// Attempts made by the current reconnect cycle, zeroed on success.
    pub reconnect_attempts: u32,

    /// Consecutive passed health checks; zeroed by any failure.
    pub health_checks_passed: u32,

    /// Consecutive failed health checks; zeroed by any pass.
    pub health_checks_failed: u32,

    /// Mirror of the circuit breaker state, `None` until first observed.
    pub circuit_breaker_state: Option<CircuitState>,
}

impl Status {
    /// Fresh record in `Disconnected`.
    pub fn new(router_id: impl Into<String>) -> Self {
        Self {
            router_id: router_id.into(),
            state: ConnectionState::Disconnected,
            protocol: None,
            preferred_protocol: None,
            version: String::new(),
            connected_at: None,
            disconnected_at: None,
            last_error_time: None,
            last_health_check: None,
            next_reconnect_at: None,
            last_error: String::new(),
            disconnect_reason: DisconnectReason::Unknown,
            reconnect_attempts: 0,
            health_checks_passed: 0,
            health_checks_failed: 0,
            circuit_breaker_state: None,
        }
    }

    fn transition(&mut self, to: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                router_id: self.router_id.clone(),
                from: self.state,
                to,
                reason: self.state.rejection_reason(to),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Move to `Connecting`.
    pub fn set_connecting(&mut self) -> Result<()> {
        self.transition(ConnectionState::Connecting)
    }

    /// Move to `Connected` and reset the failure bookkeeping.
    pub fn set_connected(&mut self, protocol: Protocol, version: impl Into<String>) -> Result<()> {
        self.transition(ConnectionState::Connected)?;
        self.protocol = Some(protocol);
        self.version = version.into();
        self.connected_at = Some(Utc::now());
        self.disconnected_at = None;
        self.next_reconnect_at = None;
        self.last_error.clear();
        self.reconnect_attempts = 0;
        self.health_checks_passed = 0;
        self.health_checks_failed = 0;
        Ok(())
    }

    /// Move to `Disconnected`, recording why.
    pub fn set_disconnected(&mut self, reason: DisconnectReason) -> Result<()> {
        self.transition(ConnectionState::Disconnected)?;
        self.connected_at = None;
        self.disconnected_at = Some(Utc::now());
        self.next_reconnect_at = None;
        self.disconnect_reason = reason;
        Ok(())
    }

    /// Move to `Reconnecting` with the attempt counter and schedule.
    pub fn set_reconnecting(&mut self, attempt: u32, next_at: DateTime<Utc>) -> Result<()> {
        self.transition(ConnectionState::Reconnecting)?;
        self.connected_at = None;
        self.reconnect_attempts = attempt;
        self.next_reconnect_at = Some(next_at);
        Ok(())
    }

    /// Move to `Error`, recording the message.
    pub fn set_error(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(ConnectionState::Error)?;
        self.last_error = message.into();
        self.last_error_time = Some(Utc::now());
        Ok(())
    }

    /// Record the outcome of a health check.
    ///
    /// Not subject to the state machine. The pass and fail counters are
    /// consecutive: incrementing one resets the other.
    pub fn record_health_check(&mut self, passed: bool) {
        self.last_health_check = Some(Utc::now());
        if passed {
            self.health_checks_passed = self.health_checks_passed.saturating_add(1);
            self.health_checks_failed = 0;
        } else {
            self.health_checks_failed = self.health_checks_failed.saturating_add(1);
            self.health_checks_passed = 0;
        }
    }

    /// Time since the connection came up, zero unless currently connected.
    pub fn uptime(&self) -> Duration {
        match (self.state, self.connected_at) {
            (ConnectionState::Connected, Some(at)) => {
                (Utc::now() - at).to_std().unwrap_or_default()
            }
            _ => Duration::ZERO,
        }
    }

    /// The four-value label published on the event bus.
    pub fn external_state(&self) -> ExternalState {
        self.state.external()
    }

    /// Breaker label for display, `UNKNOWN` until first observed.
    pub fn circuit_breaker_label(&self) -> &'static str {
        self.circuit_breaker_state
            .map_or("UNKNOWN", CircuitState::as_label)
    }
}
