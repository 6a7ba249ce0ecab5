//! Keyed registry of managed connections.

use crate::error::Result;
use crate::manager::connection::Connection;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of [`Connection`]s keyed by router id.
///
/// Adds and removes are serialized under a write lock; `get_all` hands out a
/// point-in-time snapshot.
pub struct Pool {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    max_connections: usize,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("connections", &self.connections.read().len())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Pool {
    /// Create a pool; `max_connections` of zero means unlimited.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Look up a connection by router id.
    pub fn get(&self, router_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(router_id).cloned()
    }

    /// Return the existing connection or build one with `make`.
    ///
    /// Returns `None` when the capacity cap is set and already reached.
    pub fn get_or_create<F>(&self, router_id: &str, make: F) -> Option<Arc<Connection>>
    where
        F: FnOnce() -> Arc<Connection>,
    {
        let mut connections = self.connections.write();
        if let Some(existing) = connections.get(router_id) {
            return Some(existing.clone());
        }
        if self.max_connections > 0 && connections.len() >= self.max_connections {
            warn!(
                router_id,
                limit = self.max_connections,
                "connection pool limit reached"
            );
            return None;
        }
        let connection = make();
        connections.insert(router_id.to_string(), connection.clone());
        Some(connection)
    }

    /// Detach a connection without closing it.
    pub fn remove(&self, router_id: &str) -> Option<Arc<Connection>> {
        self.connections.write().remove(router_id)
    }

    /// Snapshot of every registered connection.
    pub fn get_all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Close every connection and empty the pool.
    ///
    /// The map is snapshotted and cleared under the lock, then supervisors
    /// are cancelled and clients disconnected outside it. Supervisors call
    /// back into the pool on their way out; closing under the lock would
    /// deadlock against them. Disconnect errors are logged and the last one
    /// is returned.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<Arc<Connection>> = {
            let mut connections = self.connections.write();
            let drained = connections.values().cloned().collect();
            connections.clear();
            drained
        };

        let results = futures::future::join_all(drained.into_iter().map(|conn| async move {
            conn.cancel_reconnect();
            conn.cancel_health();
            if let Some(client) = conn.client() {
                if let Err(error) = client.disconnect().await {
                    warn!(
                        router_id = %conn.router_id(),
                        %error,
                        "client disconnect failed during pool shutdown"
                    );
                    return Err(error);
                }
            }
            debug!(router_id = %conn.router_id(), "connection closed");
            Ok(())
        }))
        .await;

        let mut last = Ok(());
        for result in results {
            if result.is_err() {
                last = result;
            }
        }
        last
    }
}
