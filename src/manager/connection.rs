//! One managed router connection.

use crate::client::RouterClient;
use crate::error::Result;
use crate::shared::{CircuitBreaker, Status};
use crate::types::{ConnectionConfig, ConnectionState, Protocol};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct ConnectionInner {
    config: ConnectionConfig,
    status: Status,
    client: Option<Arc<dyn RouterClient>>,
    reconnect_cancel: Option<CancellationToken>,
    health_cancel: Option<CancellationToken>,
    manual_disconnect: bool,
    last_reconnect_attempt: Option<Instant>,
}

/// In-process record for one router: status, live client handle, circuit
/// breaker, and the cancellation handles of its supervisor tasks.
///
/// All mutation happens under an internal write lock that is never held
/// across an await point; network calls always run after the lock is
/// released.
pub struct Connection {
    router_id: String,
    breaker: Option<Arc<CircuitBreaker>>,
    reconnect_rate_limit: Duration,
    inner: RwLock<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Connection")
            .field("router_id", &self.router_id)
            .field("state", &inner.status.state)
            .field("has_client", &inner.client.is_some())
            .field("manual_disconnect", &inner.manual_disconnect)
            .finish()
    }
}

impl Connection {
    /// Create a connection record in `Disconnected`.
    pub fn new(
        router_id: impl Into<String>,
        config: ConnectionConfig,
        breaker: Option<Arc<CircuitBreaker>>,
        reconnect_rate_limit: Duration,
    ) -> Self {
        let router_id = router_id.into();
        let mut status = Status::new(router_id.clone());
        status.preferred_protocol = config.preferred_protocol;
        Self {
            router_id,
            breaker,
            reconnect_rate_limit,
            inner: RwLock::new(ConnectionInner {
                config,
                status,
                client: None,
                reconnect_cancel: None,
                health_cancel: None,
                manual_disconnect: false,
                last_reconnect_attempt: None,
            }),
        }
    }

    /// Key of the router this connection manages.
    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    /// Copy of the connection config.
    pub fn config(&self) -> ConnectionConfig {
        self.inner.read().config.clone()
    }

    /// The circuit breaker guarding this router, if any.
    pub fn breaker(&self) -> Option<Arc<CircuitBreaker>> {
        self.breaker.clone()
    }

    /// By-value status snapshot with the live breaker label spliced in.
    ///
    /// Callers never see a reference into the locked record.
    pub fn status(&self) -> Status {
        let mut status = { self.inner.read().status.clone() };
        // Queried after the guard drops: the breaker callback takes this
        // connection's write lock.
        if let Some(breaker) = &self.breaker {
            status.circuit_breaker_state = Some(breaker.state());
        }
        status
    }

    /// Whether the state machine currently sits in `Connected`.
    pub fn is_connected(&self) -> bool {
        self.inner.read().status.state == ConnectionState::Connected
    }

    /// Current client handle, if one is attached.
    pub fn client(&self) -> Option<Arc<dyn RouterClient>> {
        self.inner.read().client.clone()
    }

    /// Whether the user explicitly disconnected this router.
    pub fn is_manually_disconnected(&self) -> bool {
        self.inner.read().manual_disconnect
    }

    /// Decide whether a user-initiated reconnect may run now.
    ///
    /// Returns `(false, ZERO)` while the breaker is open, and
    /// `(false, remaining)` inside the rate-limit window.
    pub fn can_attempt_reconnect(&self) -> (bool, Duration) {
        // Breaker first, before taking the lock: observing it may fire the
        // state-change callback, which writes back into this connection.
        if self.breaker.as_ref().is_some_and(|b| b.is_open()) {
            return (false, Duration::ZERO);
        }

        let inner = self.inner.read();
        if let Some(last) = inner.last_reconnect_attempt {
            let elapsed = last.elapsed();
            if elapsed < self.reconnect_rate_limit {
                return (false, self.reconnect_rate_limit - elapsed);
            }
        }
        (true, Duration::ZERO)
    }

    /// Run a status mutator under the write lock.
    ///
    /// Transition errors are logged and discarded: they indicate a
    /// programmer error, not a runtime failure, and the external contract is
    /// the published event stream.
    pub fn update_status<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Status) -> Result<()>,
    {
        let mut inner = self.inner.write();
        if let Err(error) = mutate(&mut inner.status) {
            warn!(router_id = %self.router_id, %error, "status transition rejected");
        }
    }

    pub(crate) fn set_client(&self, client: Option<Arc<dyn RouterClient>>) {
        self.inner.write().client = client;
    }

    pub(crate) fn set_manually_disconnected(&self, manual: bool) {
        self.inner.write().manual_disconnect = manual;
    }

    /// Store the user's protocol hint on the config and status.
    pub(crate) fn set_preferred_protocol(&self, protocol: Protocol) {
        let mut inner = self.inner.write();
        inner.config.preferred_protocol = Some(protocol);
        inner.status.preferred_protocol = Some(protocol);
    }

    pub(crate) fn set_reconnect_cancel(&self, token: Option<CancellationToken>) {
        self.inner.write().reconnect_cancel = token;
    }

    pub(crate) fn set_health_cancel(&self, token: Option<CancellationToken>) {
        self.inner.write().health_cancel = token;
    }

    /// Cancel the reconnect supervisor, if one is running. Idempotent.
    pub(crate) fn cancel_reconnect(&self) {
        if let Some(token) = self.inner.write().reconnect_cancel.take() {
            token.cancel();
        }
    }

    /// Cancel the health supervisor, if one is running. Idempotent.
    pub(crate) fn cancel_health(&self) {
        if let Some(token) = self.inner.write().health_cancel.take() {
            token.cancel();
        }
    }

    pub(crate) fn record_reconnect_attempt(&self) {
        self.inner.write().last_reconnect_attempt = Some(Instant::now());
    }
}
