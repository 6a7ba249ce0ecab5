//! Connection state machine vocabulary.
//!
//! Two label spaces exist: the five-value internal state tracked per
//! connection, and the four-value external state published on the event bus.
//! `RECONNECTING` collapses to `CONNECTING` at the boundary so that external
//! consumers never see a second intermediate state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal connection state.
///
/// Legal transitions:
///
/// ```text
/// DISCONNECTED  -> CONNECTING
/// CONNECTING    -> CONNECTED | ERROR | DISCONNECTED
/// CONNECTED     -> RECONNECTING | DISCONNECTED
/// RECONNECTING  -> CONNECTED | ERROR | DISCONNECTED
/// ERROR         -> DISCONNECTED | CONNECTING
/// ```
///
/// Everything else is rejected. In particular a live connection degrades
/// through `RECONNECTING` before it may reach `ERROR`, and the initial
/// connect attempt either succeeds, fails into `ERROR`, or is cancelled back
/// to `DISCONNECTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected; the initial state and the terminal state on shutdown.
    Disconnected,
    /// The first connect attempt is in flight.
    Connecting,
    /// A live client is attached.
    Connected,
    /// A previously live connection is being re-established.
    Reconnecting,
    /// The last attempt failed and nothing is in flight.
    Error,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected | ConnectionState::Error | Disconnected)
                | (Connected, Reconnecting | Disconnected)
                | (Reconnecting, Connected | ConnectionState::Error | Disconnected)
                | (ConnectionState::Error, Disconnected | Connecting)
        )
    }

    /// Explanation attached to a rejected transition.
    pub(crate) fn rejection_reason(self, to: ConnectionState) -> &'static str {
        use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};
        match (self, to) {
            (Disconnected, Connected) => "must go through CONNECTING",
            (Connected, ConnectionState::Error) => "must go through RECONNECTING",
            (Connecting, Reconnecting) => "initial attempt must complete, fail, or be cancelled",
            _ => "transition not permitted",
        }
    }

    /// Lowercase internal spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Map to the four-value external label space.
    ///
    /// `RECONNECTING` is reported as `CONNECTING`; everything else maps
    /// one to one.
    pub fn external(self) -> ExternalState {
        match self {
            Self::Disconnected => ExternalState::Disconnected,
            Self::Connecting | Self::Reconnecting => ExternalState::Connecting,
            Self::Connected => ExternalState::Connected,
            Self::Error => ExternalState::Error,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = crate::error::Error;

    /// Accepts both the internal lowercase spelling and the external
    /// uppercase spelling.
    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "disconnected" | "DISCONNECTED" => Ok(Self::Disconnected),
            "connecting" | "CONNECTING" => Ok(Self::Connecting),
            "connected" | "CONNECTED" => Ok(Self::Connected),
            "reconnecting" | "RECONNECTING" => Ok(Self::Reconnecting),
            "error" | "ERROR" => Ok(Self::Error),
            other => Err(crate::error::Error::validation(format!(
                "unknown connection state: {other}"
            ))),
        }
    }
}

/// External connection state, as seen by event bus consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExternalState {
    /// No connection.
    Disconnected,
    /// A connect or reconnect attempt is in flight.
    Connecting,
    /// A live client is attached.
    Connected,
    /// The last attempt failed.
    Error,
}

impl ExternalState {
    /// Uppercase external spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ExternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection was taken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// No recorded cause.
    Unknown,
    /// The user asked for the disconnect.
    Manual,
    /// The transport dropped underneath us.
    NetworkFailure,
    /// The device rejected our credentials.
    AuthFailure,
    /// An operation exceeded its deadline.
    Timeout,
    /// The circuit breaker refused further attempts.
    CircuitOpen,
    /// The manager is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Whether the reconnect supervisor should pursue this connection.
    ///
    /// Only transient causes qualify; manual, auth, circuit and shutdown
    /// disconnects stay down until user intervention.
    pub fn should_auto_reconnect(self) -> bool {
        matches!(self, Self::NetworkFailure | Self::Timeout)
    }

    /// Snake-case tag used in status records and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Manual => "manual",
            Self::NetworkFailure => "network_failure",
            Self::AuthFailure => "auth_failure",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for DisconnectReason {
    fn default() -> Self {
        Self::Unknown
    }
}
