//! Per-router circuit breaker.
//!
//! Failure isolation for one device: consecutive connect failures trip the
//! breaker to open, which fast-fails further attempts without touching the
//! router. After a cooldown the breaker lets a bounded number of half-open
//! probes through; one success closes it again.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Operations execute normally.
    Closed,
    /// Operations fail fast without executing.
    Open,
    /// A bounded number of trial operations may execute.
    HalfOpen,
}

impl CircuitState {
    /// Uppercase label used in status records.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Operation counters for the current breaker cycle.
///
/// All counters reset when the breaker changes state; the trip decision is
/// made purely from `consecutive_failures`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Operations admitted this cycle.
    pub requests: u64,
    /// Successes this cycle.
    pub total_successes: u64,
    /// Failures this cycle.
    pub total_failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub max_failures: u32,

    /// Cooldown before an open breaker admits half-open probes.
    pub timeout: Duration,

    /// Concurrent probes admitted while half-open.
    pub max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            timeout: Duration::from_secs(300),
            max_requests: 1,
        }
    }
}

/// Callback fired on every breaker state change.
pub type StateChangeCallback = Box<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

struct BreakerInner {
    state: CircuitState,
    // Bumped on every transition; results carrying a stale generation are
    // ignored so a superseded cycle cannot corrupt the counters.
    generation: u64,
    counts: Counts,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
}

/// Counted circuit breaker for one router.
///
/// The internal lock is never held across an await point and is released
/// before the state-change callback runs, so the callback may freely take
/// other locks as long as it does not block.
pub struct CircuitBreaker {
    router_id: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    on_state_change: Option<StateChangeCallback>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("router_id", &self.router_id)
            .field("state", &inner.state)
            .field("counts", &inner.counts)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker in `Closed`.
    pub fn new(router_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            router_id: router_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                opened_at: None,
                half_open_inflight: 0,
            }),
            on_state_change: None,
        }
    }

    /// Attach a state-change observer.
    ///
    /// The callback fires synchronously after every transition and must not
    /// block; publish asynchronously from inside it if needed.
    pub fn with_state_change(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    /// Router this breaker guards.
    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    /// Current state.
    ///
    /// Observing an open breaker whose cooldown has elapsed performs the
    /// transition to half-open.
    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.expire_cooldown(&mut inner);
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Whether the breaker currently fast-fails.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Snapshot of the current cycle's counters.
    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    /// Run `op` under the breaker.
    ///
    /// Fails fast with [`Error::CircuitOpen`] while open (or while half-open
    /// with all probe slots taken) without invoking `op`; otherwise returns
    /// the operation's own result and records it.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = self.before()?;
        match op().await {
            Ok(value) => {
                self.on_success(generation);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(generation);
                Err(error)
            }
        }
    }

    /// Run `op` under the breaker, honoring a cancellation token.
    ///
    /// Returns [`Error::Cancelled`] without invoking `op` when the token is
    /// already cancelled. A token fired mid-operation aborts it; the aborted
    /// attempt counts as neither success nor failure.
    pub async fn execute_with_context<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let generation = self.before()?;
        tokio::select! {
            () = cancel.cancelled() => {
                self.on_cancel(generation);
                Err(Error::Cancelled)
            }
            result = op() => match result {
                Ok(value) => {
                    self.on_success(generation);
                    Ok(value)
                }
                Err(error) => {
                    self.on_failure(generation);
                    Err(error)
                }
            }
        }
    }

    fn before(&self) -> Result<u64> {
        let (admitted, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.expire_cooldown(&mut inner);
            let admitted = match inner.state {
                CircuitState::Open => Err(Error::CircuitOpen),
                CircuitState::HalfOpen
                    if inner.half_open_inflight >= self.config.max_requests =>
                {
                    Err(Error::CircuitOpen)
                }
                CircuitState::HalfOpen => {
                    inner.half_open_inflight += 1;
                    inner.counts.requests += 1;
                    Ok(inner.generation)
                }
                CircuitState::Closed => {
                    inner.counts.requests += 1;
                    Ok(inner.generation)
                }
            };
            (admitted, transition)
        };
        self.notify(transition);
        admitted
    }

    fn on_success(&self, generation: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                None
            } else {
                inner.counts.total_successes += 1;
                inner.counts.consecutive_successes =
                    inner.counts.consecutive_successes.saturating_add(1);
                inner.counts.consecutive_failures = 0;
                match inner.state {
                    CircuitState::HalfOpen => {
                        inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                        Some(Self::shift(&mut inner, CircuitState::Closed))
                    }
                    _ => None,
                }
            }
        };
        self.notify(transition);
    }

    fn on_failure(&self, generation: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                None
            } else {
                inner.counts.total_failures += 1;
                inner.counts.consecutive_failures =
                    inner.counts.consecutive_failures.saturating_add(1);
                inner.counts.consecutive_successes = 0;
                match inner.state {
                    CircuitState::Closed
                        if inner.counts.consecutive_failures >= self.config.max_failures =>
                    {
                        Some(Self::shift(&mut inner, CircuitState::Open))
                    }
                    CircuitState::HalfOpen => {
                        inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                        Some(Self::shift(&mut inner, CircuitState::Open))
                    }
                    _ => None,
                }
            }
        };
        self.notify(transition);
    }

    fn on_cancel(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }
    }

    fn expire_cooldown(&self, inner: &mut BreakerInner) -> Option<(CircuitState, CircuitState)> {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.timeout {
                    return Some(Self::shift(inner, CircuitState::HalfOpen));
                }
            }
        }
        None
    }

    fn shift(inner: &mut BreakerInner, to: CircuitState) -> (CircuitState, CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.half_open_inflight = 0;
        inner.opened_at = (to == CircuitState::Open).then(Instant::now);
        (from, to)
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let (Some(callback), Some((from, to))) = (&self.on_state_change, transition) {
            callback(&self.router_id, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: 3,
            timeout: Duration::from_millis(100),
            max_requests: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .execute(|| async { Err::<(), _>(Error::internal("boom")) })
            .await
    }

    #[tokio::test]
    async fn trips_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("r1", quick_config());
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fast-fails without invoking the operation.
        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_op = invoked.clone();
        let err = breaker
            .execute(|| async move {
                invoked_op.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let breaker = CircuitBreaker::new("r1", quick_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        sleep(Duration::from_millis(110)).await;

        let result = breaker.execute(|| async { Ok(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.counts(), Counts::default());
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("r1", quick_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        sleep(Duration::from_millis(110)).await;

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        // The cooldown restarted, so the breaker still fast-fails.
        let err = breaker.execute(|| async { Ok(()) }).await.unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test]
    async fn half_open_bounds_concurrent_probes() {
        let breaker = Arc::new(CircuitBreaker::new("r1", quick_config()));
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        sleep(Duration::from_millis(110)).await;

        let slow_breaker = breaker.clone();
        let slow = tokio::spawn(async move {
            slow_breaker
                .execute(|| async {
                    sleep(Duration::from_millis(50)).await;
                    Ok(())
                })
                .await
        });

        // Give the probe time to occupy the single half-open slot.
        sleep(Duration::from_millis(10)).await;
        let err = breaker.execute(|| async { Ok(()) }).await.unwrap_err();
        assert!(err.is_circuit_open());

        slow.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn state_changes_fire_callback() {
        let seen: Arc<parking_lot::Mutex<Vec<(CircuitState, CircuitState)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let breaker = CircuitBreaker::new("r1", quick_config()).with_state_change(Box::new(
            move |router_id, from, to| {
                assert_eq!(router_id, "r1");
                sink.lock().push((from, to));
            },
        ));

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        sleep(Duration::from_millis(110)).await;
        breaker.execute(|| async { Ok(()) }).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_context_skips_operation() {
        let breaker = CircuitBreaker::new("r1", quick_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_op = invoked.clone();
        let err = breaker
            .execute_with_context(&cancel, || async move {
                invoked_op.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.counts().requests, 0);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_counts_neither_way() {
        let breaker = CircuitBreaker::new("r1", quick_config());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = breaker
            .execute_with_context(&cancel, || async {
                sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        let counts = breaker.counts();
        assert_eq!(counts.total_successes, 0);
        assert_eq!(counts.total_failures, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn counts_track_cycle() {
        let breaker = CircuitBreaker::new("r1", quick_config());
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        fail(&breaker).await.unwrap_err();

        let counts = breaker.counts();
        assert_eq!(counts.requests, 3);
        assert_eq!(counts.total_successes, 2);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.consecutive_failures, 1);
        assert_eq!(counts.consecutive_successes, 0);
    }
}
