//! End-to-end lifecycle tests driving the manager with mock clients.
//!
//! Supervision timing is scaled down to tens of milliseconds so the suite
//! exercises real task scheduling without slow wall-clock waits.

use async_trait::async_trait;
use routerlink::client::{ClientFactory, RouterClient};
use routerlink::types::{
    ConnectionConfig, ConnectionEvent, DisconnectReason, EventBus, EventKind, ExternalState,
    Protocol,
};
use routerlink::{
    BackoffConfig, CircuitBreakerConfig, ConnectionManager, ConnectionState, Error, HealthConfig,
    ManagerConfig, RecoveryProbeConfig, Result,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;

/// Shared failure switches for the mock fleet.
#[derive(Debug, Default)]
struct Behavior {
    fail_connect: AtomicBool,
    fail_connect_remaining: AtomicU32,
    fail_ping: AtomicBool,
    connect_attempts: AtomicU32,
}

impl Behavior {
    fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    fn should_fail_connect(&self) -> bool {
        if self.fail_connect.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_connect_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                (remaining > 0).then(|| remaining - 1)
            })
            .is_ok()
    }
}

#[derive(Debug)]
struct MockClient {
    behavior: Arc<Behavior>,
    connected: AtomicBool,
}

#[async_trait]
impl RouterClient for MockClient {
    async fn connect(&self) -> Result<()> {
        self.behavior.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.behavior.should_fail_connect() {
            return Err(Error::internal("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        if self.behavior.fail_ping.load(Ordering::SeqCst) {
            return Err(Error::internal("ping lost"));
        }
        Ok(())
    }

    fn protocol(&self) -> Protocol {
        Protocol::Api
    }

    fn version(&self) -> String {
        "7.12".to_string()
    }
}

#[derive(Debug, Default)]
struct MockFactory {
    behavior: Arc<Behavior>,
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn create_client(&self, _config: &ConnectionConfig) -> Result<Arc<dyn RouterClient>> {
        Ok(Arc::new(MockClient {
            behavior: self.behavior.clone(),
            connected: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug, Default)]
struct RecordingBus {
    events: parking_lot::Mutex<Vec<ConnectionEvent>>,
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, event: ConnectionEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl RecordingBus {
    fn len(&self) -> usize {
        self.events.lock().len()
    }

    fn saw_transition_to(&self, to: ExternalState) -> bool {
        self.events.lock().iter().any(|event| {
            matches!(event.kind, EventKind::StatusChanged { to: seen, .. } if seen == to)
        })
    }

    fn saw_reason(&self, wanted: &str) -> bool {
        self.events.lock().iter().any(|event| {
            matches!(
                &event.kind,
                EventKind::StatusChanged { reason: Some(reason), .. } if reason == wanted
            )
        })
    }

    fn saw_recovery(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| matches!(event.kind, EventKind::RouterRecovered))
    }
}

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        max_connections: 0,
        breaker: CircuitBreakerConfig {
            max_failures: 3,
            timeout: Duration::from_millis(150),
            max_requests: 1,
        },
        backoff: BackoffConfig {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(40),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
        },
        health: HealthConfig {
            interval: Duration::from_millis(30),
            timeout: Duration::from_millis(20),
            failure_threshold: 2,
        },
        probe: RecoveryProbeConfig {
            interval: Duration::from_millis(40),
            timeout: Duration::from_millis(50),
        },
        reconnect_rate_limit: Duration::from_secs(10),
        publish_timeout: Duration::from_millis(100),
    }
}

struct Fixture {
    manager: ConnectionManager,
    behavior: Arc<Behavior>,
    bus: Arc<RecordingBus>,
}

fn fixture(config: ManagerConfig) -> Fixture {
    let behavior = Arc::new(Behavior::default());
    let factory = Arc::new(MockFactory {
        behavior: behavior.clone(),
    });
    let bus = Arc::new(RecordingBus::default());
    let manager = ConnectionManager::with_config(factory, bus.clone(), config);
    Fixture {
        manager,
        behavior,
        bus,
    }
}

async fn wait_for<F>(what: &str, budget: Duration, cond: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn connect_success_publishes_and_snapshots() {
    let fx = fixture(fast_config());
    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap();

    let status = fx.manager.get_status("r1").unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.protocol, Some(Protocol::Api));
    assert_eq!(status.version, "7.12");
    assert!(status.connected_at.is_some());
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.circuit_breaker_label(), "CLOSED");

    assert!(fx.bus.saw_transition_to(ExternalState::Connecting));
    assert!(fx.bus.saw_transition_to(ExternalState::Connected));

    let stats = fx.manager.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.connected, 1);

    // Connecting an already connected router is a no-op success.
    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap();

    fx.manager.close().await.unwrap();
}

#[tokio::test]
async fn transient_failure_recovers_through_supervisor() {
    let fx = fixture(ManagerConfig {
        breaker: CircuitBreakerConfig {
            max_failures: 10,
            ..fast_config().breaker
        },
        ..fast_config()
    });
    // First two connects fail, the third lands.
    fx.behavior.fail_connect_remaining.store(2, Ordering::SeqCst);

    let err = fx
        .manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClientConnect(_)));
    assert!(fx.bus.saw_transition_to(ExternalState::Error));

    let manager = fx.manager.clone();
    wait_for("supervisor to reconnect", Duration::from_secs(2), move || {
        manager
            .get_status("r1")
            .is_ok_and(|s| s.state == ConnectionState::Connected)
    })
    .await;

    assert_eq!(fx.behavior.connect_attempts(), 3);
    let status = fx.manager.get_status("r1").unwrap();
    assert_eq!(status.reconnect_attempts, 0);
    assert!(fx.bus.saw_transition_to(ExternalState::Connected));

    fx.manager.close().await.unwrap();
}

#[tokio::test]
async fn manual_disconnect_stops_auto_reconnect() {
    let fx = fixture(ManagerConfig {
        breaker: CircuitBreakerConfig {
            max_failures: 1000,
            ..fast_config().breaker
        },
        ..fast_config()
    });
    fx.behavior.fail_connect.store(true, Ordering::SeqCst);

    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap_err();

    // Let the supervisor make a few attempts before pulling the plug.
    let behavior = fx.behavior.clone();
    wait_for("supervisor attempts", Duration::from_secs(2), move || {
        behavior.connect_attempts() >= 2
    })
    .await;

    fx.manager
        .disconnect("r1", DisconnectReason::Manual)
        .await
        .unwrap();

    let status = fx.manager.get_status("r1").unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.disconnect_reason, DisconnectReason::Manual);

    let attempts = fx.behavior.connect_attempts();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(
        fx.behavior.connect_attempts(),
        attempts,
        "no further connects after manual disconnect"
    );

    fx.manager.close().await.unwrap();
}

#[tokio::test]
async fn health_failures_trigger_reconnection() {
    let fx = fixture(fast_config());
    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap();

    fx.behavior.fail_ping.store(true, Ordering::SeqCst);

    let bus = fx.bus.clone();
    wait_for(
        "health-driven reconnect event",
        Duration::from_secs(2),
        move || bus.saw_reason("health_check_failed"),
    )
    .await;

    // Pings heal, so the supervisor brings the router back up.
    fx.behavior.fail_ping.store(false, Ordering::SeqCst);

    let manager = fx.manager.clone();
    wait_for("reconnect after health loss", Duration::from_secs(2), move || {
        manager
            .get_status("r1")
            .is_ok_and(|s| s.state == ConnectionState::Connected)
    })
    .await;

    assert!(fx.behavior.connect_attempts() >= 2);
    fx.manager.close().await.unwrap();
}

#[tokio::test]
async fn reconnect_is_rate_limited() {
    let fx = fixture(fast_config());
    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap();

    // First user reconnect is admitted and records the attempt.
    fx.manager.reconnect("r1").await.unwrap();

    let err = fx.manager.reconnect("r1").await.unwrap_err();
    match err {
        Error::RateLimited(wait) => {
            assert!(wait > Duration::ZERO);
            assert!(wait <= Duration::from_secs(10));
        }
        other => panic!("expected rate limit error, got {other}"),
    }

    fx.manager.close().await.unwrap();
}

#[tokio::test]
async fn pool_capacity_is_enforced() {
    let fx = fixture(ManagerConfig {
        max_connections: 1,
        ..fast_config()
    });

    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap();

    let err = fx
        .manager
        .connect("r2", ConnectionConfig::new("192.0.2.2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PoolExhausted(1)));

    // The registered router is unaffected.
    assert_eq!(fx.manager.router_ids(), vec!["r1".to_string()]);

    fx.manager.close().await.unwrap();
}

#[tokio::test]
async fn breaker_trip_isolates_router_until_recovery() {
    // A longer cooldown keeps the breaker open across several probe ticks.
    let fx = fixture(ManagerConfig {
        breaker: CircuitBreakerConfig {
            max_failures: 3,
            timeout: Duration::from_millis(300),
            max_requests: 1,
        },
        ..fast_config()
    });
    fx.behavior.fail_connect.store(true, Ordering::SeqCst);

    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap_err();

    // The supervisor keeps trying until the third consecutive failure trips
    // the breaker, at which point it exits permanently.
    let behavior = fx.behavior.clone();
    wait_for("breaker trip", Duration::from_secs(2), move || {
        behavior.connect_attempts() >= 3
    })
    .await;

    let manager = fx.manager.clone();
    wait_for("breaker label open", Duration::from_secs(2), move || {
        manager
            .get_status("r1")
            .is_ok_and(|s| s.circuit_breaker_label() == "OPEN")
    })
    .await;

    let status = fx.manager.get_status("r1").unwrap();
    assert_eq!(status.state, ConnectionState::Error);

    // Device comes back; the side-band probe notices and publishes recovery.
    fx.behavior.fail_connect.store(false, Ordering::SeqCst);
    let bus = fx.bus.clone();
    wait_for("recovery event", Duration::from_secs(2), move || {
        bus.saw_recovery()
    })
    .await;

    // After the cooldown a user reconnect goes through the half-open probe.
    sleep(Duration::from_millis(320)).await;
    fx.manager.reconnect("r1").await.unwrap();

    let status = fx.manager.get_status("r1").unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.circuit_breaker_label(), "CLOSED");

    assert_ok!(fx.manager.close().await);
}

#[tokio::test]
async fn close_drains_supervisors_and_stops_events() {
    let fx = fixture(ManagerConfig {
        breaker: CircuitBreakerConfig {
            max_failures: 1000,
            ..fast_config().breaker
        },
        ..fast_config()
    });
    fx.behavior.fail_connect.store(true, Ordering::SeqCst);

    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap_err();

    fx.manager.close().await.unwrap();

    // Once close returns no supervisor is left to publish or dial.
    let events = fx.bus.len();
    let attempts = fx.behavior.connect_attempts();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.bus.len(), events);
    assert_eq!(fx.behavior.connect_attempts(), attempts);

    let err = fx
        .manager
        .connect("r2", ConnectionConfig::new("192.0.2.2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ManagerClosed));
}

#[tokio::test]
async fn remove_detaches_router() {
    let fx = fixture(fast_config());
    fx.manager
        .connect("r1", ConnectionConfig::new("192.0.2.1"))
        .await
        .unwrap();

    fx.manager.remove("r1").await.unwrap();
    assert!(matches!(
        fx.manager.get_status("r1"),
        Err(Error::NotFound(_))
    ));
    assert!(fx.bus.saw_transition_to(ExternalState::Disconnected));

    fx.manager.close().await.unwrap();
}
