//! Exponential backoff with jitter and cancellable retry driving.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_interval: Duration,

    /// Ceiling for any single delay.
    pub max_interval: Duration,

    /// Factor by which the base delay grows per failure, at least 1.0.
    pub multiplier: f64,

    /// Jitter factor in `0.0..=1.0`; each delay lands in
    /// `base * (1 - r) ..= base * (1 + r)`.
    pub randomization_factor: f64,

    /// Give up once this much wall time has elapsed; `None` retries forever.
    pub max_elapsed_time: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_elapsed_time: None,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (zero-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(raw.min(self.max_interval.as_secs_f64()))
    }

    /// Delay before retry number `attempt` with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let range = base * self.randomization_factor;
        Duration::from_secs_f64((base + jitter(range)).max(0.0))
    }
}

// Clock-derived jitter, same trick the transport reconnect logic uses to
// avoid pulling in a dedicated RNG.
fn jitter(range: f64) -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let unit = f64::from(nanos) / 1_000_000_000.0;
    unit * range * 2.0 - range
}

/// Failure classification for [`retry`].
#[derive(Debug)]
pub enum RetryError {
    /// Retry after the next backoff delay.
    Transient(Error),

    /// Stop immediately and surface the error.
    Permanent(Error),
}

impl RetryError {
    /// Mark an error as retryable.
    pub fn transient(error: Error) -> Self {
        Self::Transient(error)
    }

    /// Mark an error as final.
    pub fn permanent(error: Error) -> Self {
        Self::Permanent(error)
    }

    /// Unwrap the underlying error.
    pub fn into_inner(self) -> Error {
        match self {
            Self::Transient(error) | Self::Permanent(error) => error,
        }
    }
}

/// Drive `op` until it succeeds, fails permanently, exhausts the elapsed-time
/// budget, or the token is cancelled.
///
/// The operation receives the zero-based attempt number. A pending backoff
/// sleep is aborted immediately when `cancel` fires and the cancellation is
/// surfaced as [`Error::Cancelled`]; callers must not retry past it.
pub async fn retry<T, F, Fut>(
    config: &BackoffConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, RetryError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(RetryError::Permanent(error)) => return Err(error),
            Err(RetryError::Transient(error)) => {
                if let Some(budget) = config.max_elapsed_time {
                    if started.elapsed() >= budget {
                        return Err(error);
                    }
                }

                let delay = config.delay(attempt);
                debug!(attempt, ?delay, error = %error, "retrying after backoff");
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
