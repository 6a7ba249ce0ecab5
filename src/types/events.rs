//! Status-change events published to the external event bus.

use crate::error::Result;
use crate::types::ExternalState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag stamped on every event this crate publishes.
pub const EVENT_SOURCE: &str = "connection-manager";

/// An event emitted by the connection manager.
///
/// Events for a given router are published in transition order; consumers
/// only ever see the four-value external state vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// Unique event id.
    pub id: Uuid,

    /// Router the event concerns.
    pub router_id: String,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Originating subsystem, always [`EVENT_SOURCE`].
    pub source: String,

    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The connection moved between external states.
    StatusChanged {
        /// State before the transition.
        from: ExternalState,
        /// State after the transition.
        to: ExternalState,
        /// Error message, when the transition was failure-driven.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Extra cause tag, e.g. `health_check_failed`.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A recovery probe reached a router whose circuit breaker is open.
    RouterRecovered,
}

impl ConnectionEvent {
    /// Build a status-change event.
    pub fn status_changed(
        router_id: impl Into<String>,
        from: ExternalState,
        to: ExternalState,
        error: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            router_id: router_id.into(),
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
            kind: EventKind::StatusChanged {
                from,
                to,
                error,
                reason,
            },
        }
    }

    /// Build a recovery event.
    pub fn router_recovered(router_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            router_id: router_id.into(),
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
            kind: EventKind::RouterRecovered,
        }
    }
}

/// External event bus consumed by the manager.
///
/// Publish failures are logged by the manager and never propagated to the
/// operation that triggered the event; each publish runs under a bounded
/// timeout.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver one event.
    async fn publish(&self, event: ConnectionEvent) -> Result<()>;
}
