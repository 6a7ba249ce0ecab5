//! Connection lifecycle manager.
//!
//! [`ConnectionManager`] is the public façade over the per-router machinery:
//! the connection pool, the circuit breakers, the reconnect and health
//! supervisor tasks, and the recovery probes. Status-change events flow out
//! through the [`EventBus`] in transition order per router.

pub mod connection;
pub mod pool;
mod recovery;
mod supervisor;

pub use connection::Connection;
pub use pool::Pool;

use crate::client::{ClientFactory, RouterClient};
use crate::error::{Error, Result};
use crate::shared::{BackoffConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, Status};
use crate::types::{
    ConnectionConfig, ConnectionEvent, ConnectionState, DisconnectReason, EventBus, ExternalState,
    Protocol,
};
use recovery::RecoveryProbes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Health supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Tick period of the health supervisor.
    pub interval: Duration,

    /// Budget for a single ping.
    pub timeout: Duration,

    /// Consecutive ping failures that trigger reconnection.
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Recovery probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryProbeConfig {
    /// Tick period of the probe while a breaker is open.
    pub interval: Duration,

    /// Budget for one create + connect + ping round.
    pub timeout: Duration,
}

impl Default for RecoveryProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Manager-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Pool capacity; zero means unlimited.
    pub max_connections: usize,

    /// Circuit breaker settings applied per router.
    pub breaker: CircuitBreakerConfig,

    /// Backoff settings for the reconnect supervisor.
    pub backoff: BackoffConfig,

    /// Health supervision settings.
    pub health: HealthConfig,

    /// Recovery probe settings.
    pub probe: RecoveryProbeConfig,

    /// Minimum spacing between user-initiated reconnects per router.
    pub reconnect_rate_limit: Duration,

    /// Budget for one event bus publish.
    pub publish_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            breaker: CircuitBreakerConfig::default(),
            backoff: BackoffConfig::default(),
            health: HealthConfig::default(),
            probe: RecoveryProbeConfig::default(),
            reconnect_rate_limit: Duration::from_secs(10),
            publish_timeout: Duration::from_millis(100),
        }
    }
}

/// Connection counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Registered connections.
    pub total: usize,
    /// Connections in `Connected`.
    pub connected: usize,
    /// Connections in `Connecting`.
    pub connecting: usize,
    /// Connections in `Reconnecting`.
    pub reconnecting: usize,
    /// Connections in `Disconnected`.
    pub disconnected: usize,
    /// Connections in `Error`.
    pub error: usize,
}

pub(crate) struct ManagerInner {
    pub(crate) pool: Pool,
    pub(crate) factory: Arc<dyn ClientFactory>,
    pub(crate) events: Arc<dyn EventBus>,
    pub(crate) config: ManagerConfig,
    pub(crate) probes: RecoveryProbes,
    pub(crate) tasks: TaskTracker,
    pub(crate) shutdown: CancellationToken,
    pub(crate) closed: AtomicBool,
}

/// Public façade over the per-router connection machinery.
///
/// Cheap to clone; all clones drive the same manager.
///
/// # Examples
///
/// ```rust,no_run
/// use routerlink::ConnectionManager;
/// use routerlink::types::{ConnectionConfig, DisconnectReason};
/// # use routerlink::client::ClientFactory;
/// # use routerlink::types::EventBus;
/// # use std::sync::Arc;
///
/// # async fn example(
/// #     factory: Arc<dyn ClientFactory>,
/// #     bus: Arc<dyn EventBus>,
/// # ) -> routerlink::Result<()> {
/// let manager = ConnectionManager::new(factory, bus);
///
/// let config = ConnectionConfig::new("192.0.2.1").with_credentials("admin", "secret");
/// manager.connect("core-router", config).await?;
///
/// let status = manager.get_status("core-router")?;
/// println!("uptime: {:?}", status.uptime());
///
/// manager.disconnect("core-router", DisconnectReason::Manual).await?;
/// manager.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.inner.pool.len())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager with default configuration.
    pub fn new(factory: Arc<dyn ClientFactory>, events: Arc<dyn EventBus>) -> Self {
        Self::with_config(factory, events, ManagerConfig::default())
    }

    /// Create a manager with explicit configuration.
    pub fn with_config(
        factory: Arc<dyn ClientFactory>,
        events: Arc<dyn EventBus>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                pool: Pool::new(config.max_connections),
                factory,
                events,
                config,
                probes: RecoveryProbes::default(),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect a router, registering it if needed.
    ///
    /// Returns success immediately when the router is already connected. On
    /// failure the status moves to `Error` and, unless the disconnect was
    /// manual or the breaker is open, the reconnect supervisor takes over.
    pub async fn connect(&self, router_id: &str, config: ConnectionConfig) -> Result<()> {
        self.inner.connect(router_id, config).await
    }

    /// Disconnect a router.
    ///
    /// A `Manual` reason pins the connection down until the user reconnects;
    /// both supervisors are cancelled before the client is touched so that
    /// neither can race the teardown.
    pub async fn disconnect(&self, router_id: &str, reason: DisconnectReason) -> Result<()> {
        let conn = self
            .inner
            .pool
            .get(router_id)
            .ok_or_else(|| Error::not_found(router_id))?;

        if reason == DisconnectReason::Manual {
            conn.set_manually_disconnected(true);
        }
        conn.cancel_health();
        conn.cancel_reconnect();

        if let Some(client) = conn.client() {
            if let Err(error) = client.disconnect().await {
                warn!(router_id, %error, "client disconnect failed");
            }
        }
        conn.set_client(None);

        let previous = conn.status().external_state();
        conn.update_status(|status| status.set_disconnected(reason));
        self.inner
            .publish_status(router_id, previous, ExternalState::Disconnected, None, None)
            .await;
        info!(router_id, reason = %reason, "router disconnected");
        Ok(())
    }

    /// User-initiated reconnect, rate limited per router.
    pub async fn reconnect(&self, router_id: &str) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }
        let conn = self
            .inner
            .pool
            .get(router_id)
            .ok_or_else(|| Error::not_found(router_id))?;

        let (allowed, wait) = conn.can_attempt_reconnect();
        if !allowed {
            return Err(Error::RateLimited(wait));
        }

        conn.set_manually_disconnected(false);
        conn.record_reconnect_attempt();
        let config = conn.config();
        self.inner.connect(router_id, config).await
    }

    /// Disconnect a router and drop it from the pool.
    pub async fn remove(&self, router_id: &str) -> Result<()> {
        let conn = self
            .inner
            .pool
            .remove(router_id)
            .ok_or_else(|| Error::not_found(router_id))?;

        self.inner.probes.stop(router_id);
        conn.set_manually_disconnected(true);
        conn.cancel_health();
        conn.cancel_reconnect();

        if let Some(client) = conn.client() {
            if let Err(error) = client.disconnect().await {
                warn!(router_id, %error, "client disconnect failed during removal");
            }
        }
        conn.set_client(None);

        let previous = conn.status().external_state();
        conn.update_status(|status| status.set_disconnected(DisconnectReason::Manual));
        self.inner
            .publish_status(router_id, previous, ExternalState::Disconnected, None, None)
            .await;
        info!(router_id, "router removed");
        Ok(())
    }

    /// Status snapshot for one router.
    pub fn get_status(&self, router_id: &str) -> Result<Status> {
        self.inner
            .pool
            .get(router_id)
            .map(|conn| conn.status())
            .ok_or_else(|| Error::not_found(router_id))
    }

    /// Status snapshots for every registered router.
    pub fn get_all_statuses(&self) -> HashMap<String, Status> {
        self.inner
            .pool
            .get_all()
            .into_iter()
            .map(|conn| (conn.router_id().to_string(), conn.status()))
            .collect()
    }

    /// Ids of every registered router.
    pub fn router_ids(&self) -> Vec<String> {
        self.inner
            .pool
            .get_all()
            .into_iter()
            .map(|conn| conn.router_id().to_string())
            .collect()
    }

    /// Store the user's protocol hint for a router.
    pub fn set_preferred_protocol(&self, router_id: &str, protocol: Protocol) -> Result<()> {
        let conn = self
            .inner
            .pool
            .get(router_id)
            .ok_or_else(|| Error::not_found(router_id))?;
        conn.set_preferred_protocol(protocol);
        Ok(())
    }

    /// Connection counts by state.
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for conn in self.inner.pool.get_all() {
            stats.total += 1;
            match conn.status().state {
                ConnectionState::Connected => stats.connected += 1,
                ConnectionState::Connecting => stats.connecting += 1,
                ConnectionState::Reconnecting => stats.reconnecting += 1,
                ConnectionState::Disconnected => stats.disconnected += 1,
                ConnectionState::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Shut the manager down.
    ///
    /// Cancels every supervisor and probe, disconnects all clients, and
    /// waits for every task to finish. Idempotent; later lifecycle calls
    /// fail with [`Error::ManagerClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing connection manager");
        self.inner.shutdown.cancel();
        self.inner.probes.stop_all();
        let result = self.inner.pool.close_all().await;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        result
    }
}

impl ManagerInner {
    pub(crate) async fn connect(
        self: &Arc<Self>,
        router_id: &str,
        config: ConnectionConfig,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }

        let conn = self
            .pool
            .get_or_create(router_id, || self.build_connection(router_id, config))
            .ok_or(Error::PoolExhausted(self.config.max_connections))?;

        if conn.is_connected() {
            debug!(router_id, "already connected");
            return Ok(());
        }
        conn.set_manually_disconnected(false);

        let previous = conn.status().external_state();
        conn.update_status(|status| status.set_connecting());
        self.publish_status(router_id, previous, ExternalState::Connecting, None, None)
            .await;

        let token = self.shutdown.child_token();
        match self.establish(&conn, &token).await {
            Ok(client) => {
                let protocol = client.protocol();
                let version = client.version();
                conn.set_client(Some(client));
                conn.update_status(|status| status.set_connected(protocol, version));
                self.publish_status(
                    router_id,
                    ExternalState::Connecting,
                    ExternalState::Connected,
                    None,
                    None,
                )
                .await;
                self.spawn_health_supervisor(&conn);
                info!(router_id, protocol = %protocol, "router connected");
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                conn.update_status(|status| status.set_error(&message));
                self.publish_status(
                    router_id,
                    ExternalState::Connecting,
                    ExternalState::Error,
                    Some(message),
                    None,
                )
                .await;

                let breaker_open = conn.breaker().map_or(true, |breaker| breaker.is_open());
                if !conn.is_manually_disconnected() && !breaker_open {
                    self.spawn_reconnect_supervisor(&conn);
                }
                Err(error)
            }
        }
    }

    /// Create the client and connect it, guarded by the router's breaker.
    pub(crate) async fn establish(
        &self,
        conn: &Arc<Connection>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn RouterClient>> {
        let factory = Arc::clone(&self.factory);
        let config = conn.config();
        let op = move || async move {
            let client = factory
                .create_client(&config)
                .await
                .map_err(|e| Error::client_create(e))?;
            tokio::time::timeout(config.connection_timeout, client.connect())
                .await
                .map_err(|_| Error::timeout(config.connection_timeout))?
                .map_err(|e| Error::client_connect(e))?;
            Ok(client)
        };

        match conn.breaker() {
            Some(breaker) => breaker.execute_with_context(cancel, op).await,
            None => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                op().await
            }
        }
    }

    fn build_connection(self: &Arc<Self>, router_id: &str, config: ConnectionConfig) -> Arc<Connection> {
        let weak = Arc::downgrade(self);
        let breaker = CircuitBreaker::new(router_id, self.config.breaker.clone())
            .with_state_change(Box::new(move |router_id, from, to| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                debug!(router_id, from = %from, to = %to, "circuit breaker state changed");
                if let Some(conn) = inner.pool.get(router_id) {
                    conn.update_status(|status| {
                        status.circuit_breaker_state = Some(to);
                        Ok(())
                    });
                }
                // Probe lifetime tracks the open state; everything here must
                // stay non-blocking because the breaker calls us inline.
                if to == CircuitState::Open {
                    inner.start_recovery_probe(router_id);
                } else if from == CircuitState::Open {
                    inner.probes.stop(router_id);
                }
            }));

        Arc::new(Connection::new(
            router_id,
            config,
            Some(Arc::new(breaker)),
            self.config.reconnect_rate_limit,
        ))
    }

    pub(crate) async fn publish_status(
        &self,
        router_id: &str,
        from: ExternalState,
        to: ExternalState,
        error: Option<String>,
        reason: Option<String>,
    ) {
        self.publish_event(ConnectionEvent::status_changed(
            router_id, from, to, error, reason,
        ))
        .await;
    }

    pub(crate) async fn publish_event(&self, event: ConnectionEvent) {
        let router_id = event.router_id.clone();
        match tokio::time::timeout(self.config.publish_timeout, self.events.publish(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(router_id = %router_id, %error, "event publish failed"),
            Err(_) => warn!(router_id = %router_id, "event publish timed out"),
        }
    }
}
