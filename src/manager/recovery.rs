//! Background recovery probing for routers behind an open breaker.
//!
//! While a router's circuit breaker is open, nothing in the normal path will
//! touch the device. The recovery probe periodically builds a throwaway
//! client and runs connect + ping against the router; on success it publishes
//! a recovery event so operators and schedulers learn the device is back.
//! The probe never becomes the connection's live client, and the breaker
//! still leaves open through its own half-open logic on the next real
//! operation.

use crate::error::{Error, Result};
use crate::manager::connection::Connection;
use crate::manager::ManagerInner;
use crate::types::ConnectionEvent;
use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry of running recovery probes, keyed by router id.
#[derive(Debug, Default)]
pub(crate) struct RecoveryProbes {
    probes: DashMap<String, CancellationToken>,
}

impl RecoveryProbes {
    /// Register a probe token, cancelling any probe it replaces.
    pub(crate) fn register(&self, router_id: &str, token: CancellationToken) {
        if let Some(previous) = self.probes.insert(router_id.to_string(), token) {
            previous.cancel();
        }
    }

    /// Cancel and forget the probe for a router. Idempotent.
    pub(crate) fn stop(&self, router_id: &str) {
        if let Some((_, token)) = self.probes.remove(router_id) {
            token.cancel();
        }
    }

    /// Cancel every running probe.
    pub(crate) fn stop_all(&self) {
        for entry in self.probes.iter() {
            entry.value().cancel();
        }
        self.probes.clear();
    }

    /// Drop a probe's own registration on natural exit.
    ///
    /// A cancelled token means someone else already owns the entry (the
    /// probe was stopped or replaced), so nothing is removed.
    fn finish(&self, router_id: &str, token: &CancellationToken) {
        if !token.is_cancelled() {
            self.probes.remove(router_id);
        }
    }

    /// Whether a probe is registered for the router.
    pub(crate) fn contains(&self, router_id: &str) -> bool {
        self.probes.contains_key(router_id)
    }
}

impl ManagerInner {
    /// Start a recovery probe for a router whose breaker just opened.
    pub(crate) fn start_recovery_probe(self: &Arc<Self>, router_id: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let token = self.shutdown.child_token();
        self.probes.register(router_id, token.clone());

        let inner = Arc::clone(self);
        let router_id = router_id.to_string();
        self.tasks.spawn(async move {
            inner.run_recovery_probe(router_id, token).await;
        });
    }

    async fn run_recovery_probe(self: Arc<Self>, router_id: String, cancel: CancellationToken) {
        let period = self.config.probe.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        info!(router_id = %router_id, "recovery probe started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(conn) = self.pool.get(&router_id) else {
                break;
            };
            let still_open = conn.breaker().is_some_and(|breaker| breaker.is_open());
            if !still_open {
                break;
            }

            match self.probe_once(&conn).await {
                Ok(()) => {
                    info!(router_id = %router_id, "router reachable again");
                    self.publish_event(ConnectionEvent::router_recovered(&router_id))
                        .await;
                }
                Err(error) => {
                    debug!(router_id = %router_id, %error, "recovery probe attempt failed");
                }
            }
        }

        self.probes.finish(&router_id, &cancel);
        debug!(router_id = %router_id, "recovery probe stopped");
    }

    /// One throwaway connect + ping against the router.
    async fn probe_once(&self, conn: &Arc<Connection>) -> Result<()> {
        let config = conn.config();
        let budget = self.config.probe.timeout;

        tokio::time::timeout(budget, async {
            let client = self
                .factory
                .create_client(&config)
                .await
                .map_err(|e| Error::client_create(e))?;
            client.connect().await.map_err(|e| Error::client_connect(e))?;
            client.ping().await.map_err(|e| Error::ping(e))?;
            if let Err(error) = client.disconnect().await {
                debug!(router_id = %conn.router_id(), %error, "probe client disconnect failed");
            }
            Ok(())
        })
        .await
        .map_err(|_| Error::timeout(budget))?
    }
}
