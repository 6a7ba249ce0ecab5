//! Per-connection supervisor tasks: reconnection and health checking.

use crate::error::Error;
use crate::manager::connection::Connection;
use crate::manager::ManagerInner;
use crate::shared::backoff::{retry, RetryError};
use crate::types::{ConnectionState, DisconnectReason, ExternalState};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reason tag attached to the event published when health checking gives up
/// on a live connection.
pub(crate) const HEALTH_CHECK_FAILED: &str = "health_check_failed";

impl ManagerInner {
    /// Launch the reconnect supervisor for a connection.
    ///
    /// At most one supervisor runs per connection; a previous one is
    /// cancelled before the replacement starts. The task is tracked so that
    /// shutdown can await it.
    pub(crate) fn spawn_reconnect_supervisor(self: &Arc<Self>, conn: &Arc<Connection>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        conn.cancel_reconnect();
        let token = self.shutdown.child_token();
        conn.set_reconnect_cancel(Some(token.clone()));

        let inner = Arc::clone(self);
        let conn = Arc::clone(conn);
        self.tasks.spawn(async move {
            inner.run_reconnect(conn, token).await;
        });
    }

    async fn run_reconnect(self: Arc<Self>, conn: Arc<Connection>, cancel: CancellationToken) {
        let router_id = conn.router_id().to_string();
        debug!(router_id = %router_id, "reconnect supervisor started");

        let previous = conn.status().external_state();
        let next_at = Utc::now() + backoff_delta(self.config.backoff.initial_interval);
        conn.update_status(|status| {
            // Already placed in Reconnecting by the health supervisor.
            if status.state == ConnectionState::Reconnecting {
                return Ok(());
            }
            let attempt = status.reconnect_attempts;
            status.set_reconnecting(attempt, next_at)
        });
        self.publish_status(&router_id, previous, ExternalState::Connecting, None, None)
            .await;

        let backoff_config = self.config.backoff.clone();
        let result = retry(&backoff_config, &cancel, |_| {
            let inner = Arc::clone(&self);
            let conn = Arc::clone(&conn);
            let cancel = cancel.clone();
            async move {
                if conn.is_manually_disconnected() {
                    return Err(RetryError::permanent(Error::internal(
                        "manually disconnected",
                    )));
                }
                let Some(breaker) = conn.breaker() else {
                    return Err(RetryError::permanent(Error::internal(
                        "no circuit breaker configured",
                    )));
                };
                // An open breaker is the recovery probe's problem, not this
                // loop's.
                if breaker.is_open() {
                    return Err(RetryError::permanent(Error::CircuitOpen));
                }

                conn.update_status(|status| {
                    status.reconnect_attempts = status.reconnect_attempts.saturating_add(1);
                    Ok(())
                });

                match inner.establish(&conn, &cancel).await {
                    Ok(client) => {
                        conn.set_client(Some(client.clone()));
                        Ok(client)
                    }
                    Err(Error::Cancelled) => Err(RetryError::permanent(Error::Cancelled)),
                    Err(error) => {
                        conn.update_status(|status| {
                            status.last_error = error.to_string();
                            status.last_error_time = Some(Utc::now());
                            Ok(())
                        });
                        Err(RetryError::transient(error))
                    }
                }
            }
        })
        .await;

        match result {
            Ok(client) => {
                let protocol = client.protocol();
                let version = client.version();
                conn.update_status(|status| {
                    // The entry transition into Reconnecting is rejected when
                    // the supervisor was spawned out of Error; walk the legal
                    // edges instead of leaving a connected router in Error.
                    if status.state == ConnectionState::Error {
                        status.set_connecting()?;
                    }
                    status.set_connected(protocol, version)
                });
                self.publish_status(
                    &router_id,
                    ExternalState::Connecting,
                    ExternalState::Connected,
                    None,
                    None,
                )
                .await;
                self.spawn_health_supervisor(&conn);
                debug!(router_id = %router_id, "reconnect supervisor succeeded");
            }
            Err(Error::Cancelled) => {
                debug!(router_id = %router_id, "reconnect supervisor cancelled");
            }
            Err(error) if conn.is_manually_disconnected() => {
                debug!(router_id = %router_id, %error, "reconnect supervisor stopped by manual disconnect");
                let previous = conn.status().external_state();
                conn.update_status(|status| status.set_disconnected(DisconnectReason::Manual));
                self.publish_status(
                    &router_id,
                    previous,
                    ExternalState::Disconnected,
                    None,
                    None,
                )
                .await;
            }
            Err(error) => {
                warn!(router_id = %router_id, %error, "reconnect supervisor gave up");
                let previous = conn.status().external_state();
                let message = error.to_string();
                conn.update_status(|status| status.set_error(&message));
                self.publish_status(
                    &router_id,
                    previous,
                    ExternalState::Error,
                    Some(message),
                    None,
                )
                .await;
            }
        }
    }

    /// Launch the health supervisor for a freshly connected router.
    pub(crate) fn spawn_health_supervisor(self: &Arc<Self>, conn: &Arc<Connection>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        conn.cancel_health();
        let token = self.shutdown.child_token();
        conn.set_health_cancel(Some(token.clone()));

        let inner = Arc::clone(self);
        let conn = Arc::clone(conn);
        self.tasks.spawn(async move {
            inner.run_health(conn, token).await;
        });
    }

    async fn run_health(self: Arc<Self>, conn: Arc<Connection>, cancel: CancellationToken) {
        let router_id = conn.router_id().to_string();
        let period = self.config.health.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut consecutive_failures: u32 = 0;
        debug!(router_id = %router_id, "health supervisor started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(router_id = %router_id, "health supervisor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if !conn.is_connected() {
                continue;
            }
            let Some(client) = conn.client() else {
                continue;
            };

            let outcome = match tokio::time::timeout(self.config.health.timeout, client.ping())
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(Error::ping(error)),
                Err(_) => Err(Error::timeout(self.config.health.timeout)),
            };

            match outcome {
                Ok(()) => {
                    consecutive_failures = 0;
                    conn.update_status(|status| {
                        status.record_health_check(true);
                        Ok(())
                    });
                }
                Err(error) => {
                    consecutive_failures += 1;
                    conn.update_status(|status| {
                        status.record_health_check(false);
                        Ok(())
                    });
                    warn!(
                        router_id = %router_id,
                        %error,
                        failures = consecutive_failures,
                        "health check failed"
                    );

                    if consecutive_failures >= self.config.health.failure_threshold {
                        let next_at = Utc::now() + backoff_delta(self.config.backoff.initial_interval);
                        conn.update_status(|status| {
                            let attempt = status.reconnect_attempts;
                            status.set_reconnecting(attempt, next_at)
                        });
                        self.publish_status(
                            &router_id,
                            ExternalState::Connected,
                            ExternalState::Connecting,
                            None,
                            Some(HEALTH_CHECK_FAILED.to_string()),
                        )
                        .await;
                        self.spawn_reconnect_supervisor(&conn);
                        return;
                    }
                }
            }
        }
    }
}

fn backoff_delta(interval: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero())
}
