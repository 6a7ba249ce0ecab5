//! Core data model: states, protocols, configs, and events.

pub mod config;
pub mod events;
pub mod protocol;
pub mod state;

pub use config::{ConnectionConfig, DEFAULT_API_PORT};
pub use events::{ConnectionEvent, EventBus, EventKind, EVENT_SOURCE};
pub use protocol::Protocol;
pub use state::{ConnectionState, DisconnectReason, ExternalState};
