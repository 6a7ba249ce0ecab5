//! # Routerlink
//!
//! Connection lifecycle management for fleets of network routers.
//!
//! This crate maintains long-lived, protocol-agnostic connections to a fleet
//! of devices. For each router it owns:
//! - a constrained state machine with explicit legal transitions,
//! - a circuit breaker with counted trips and half-open probing,
//! - a reconnect supervisor driving exponential backoff with jitter,
//! - a health supervisor running periodic pings,
//! - a recovery probe that watches tripped routers with throwaway clients,
//!
//! and publishes status-change events to an external bus. Protocol-specific
//! clients are supplied from outside through the [`RouterClient`] and
//! [`ClientFactory`] capabilities.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routerlink::{ConnectionManager, ManagerConfig};
//! use routerlink::types::{ConnectionConfig, Protocol};
//! # use routerlink::client::ClientFactory;
//! # use routerlink::types::EventBus;
//! # use std::sync::Arc;
//!
//! # async fn example(
//! #     factory: Arc<dyn ClientFactory>,
//! #     bus: Arc<dyn EventBus>,
//! # ) -> routerlink::Result<()> {
//! let manager = ConnectionManager::with_config(factory, bus, ManagerConfig::default());
//!
//! let config = ConnectionConfig::new("192.0.2.1")
//!     .with_credentials("admin", "secret")
//!     .with_preferred_protocol(Protocol::ApiSsl);
//! manager.connect("core-1", config).await?;
//!
//! for (router_id, status) in manager.get_all_statuses() {
//!     println!("{router_id}: {}", status.state);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unsafe_code)]
// Allow certain clippy lints that are too pedantic for this codebase
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod manager;
pub mod shared;
pub mod types;

// Re-export commonly used types
pub use client::{ClientFactory, RouterClient};
pub use error::{Error, Result};
pub use manager::{ConnectionManager, HealthConfig, ManagerConfig, ManagerStats, RecoveryProbeConfig};
pub use shared::{
    BackoffConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, Counts, Status,
};
pub use types::{
    ConnectionConfig, ConnectionEvent, ConnectionState, DisconnectReason, EventBus, EventKind,
    ExternalState, Protocol, DEFAULT_API_PORT,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
