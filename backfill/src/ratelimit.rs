//! Shared rate limiting and retry plumbing for data-source calls.
//!
//! One [`RateLimiter`] instance is shared by every download worker; its
//! internal accounting is synchronized, so callers never coordinate it
//! themselves. A downloader without a limiter still functions, just
//! unthrottled.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use backfill_core::{BackfillError, BackoffConfig};

/// Budget for a sliding accounting window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum number of calls within a single window.
    pub max_calls: u64,
    /// Duration of the accounting window.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_calls: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct LimiterRuntime {
    calls_in_window: u64,
    window_start: Instant,
}

/// Windowed call budget shared across all download workers.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    runtime: Mutex<LimiterRuntime>,
}

impl RateLimiter {
    /// Create a limiter from a validated config.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` if the budget or window is zero.
    pub fn new(cfg: RateLimiterConfig) -> Result<Self, BackfillError> {
        if cfg.max_calls == 0 {
            return Err(BackfillError::config("rate limiter max_calls must be > 0"));
        }
        if cfg.window.is_zero() {
            return Err(BackfillError::config("rate limiter window must be > 0"));
        }
        Ok(Self {
            cfg,
            runtime: Mutex::new(LimiterRuntime {
                calls_in_window: 0,
                window_start: Instant::now(),
            }),
        })
    }

    /// Non-blocking variant of [`acquire`](Self::acquire): consume one unit
    /// if the window has capacity.
    ///
    /// # Errors
    /// Returns [`BackfillError::RateLimited`] carrying the time until the
    /// window resets when the budget is exhausted.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn try_acquire(&self) -> Result<(), BackfillError> {
        self.poll_window().map_err(|wait| BackfillError::RateLimited {
            retry_in_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Consume one unit if the window has capacity; otherwise report the
    /// time until the window resets.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    fn poll_window(&self) -> Result<(), Duration> {
        let mut rt = self.runtime.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();

        let elapsed = now.duration_since(rt.window_start);
        if elapsed >= self.cfg.window {
            rt.calls_in_window = 0;
            // Keep windows aligned to regular boundaries even with gaps in
            // usage: advance by the number of complete windows that passed.
            let windows_passed = elapsed.as_nanos() / self.cfg.window.as_nanos();
            let boundary_offset = Duration::from_nanos(
                (windows_passed * self.cfg.window.as_nanos())
                    .try_into()
                    .unwrap_or(u64::MAX),
            );
            rt.window_start += boundary_offset;
        }

        if rt.calls_in_window < self.cfg.max_calls {
            rt.calls_in_window += 1;
            return Ok(());
        }

        let elapsed = now.duration_since(rt.window_start);
        Err(self.cfg.window.saturating_sub(elapsed))
    }

    /// Block (asynchronously) until a call unit is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            match self.poll_window() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait.max(Duration::from_millis(1))).await,
            }
        }
    }

    /// Run `op` under a permit, retrying transient failures with exponential
    /// backoff up to `attempts` tries. The final failure is surfaced when the
    /// retries are exhausted.
    ///
    /// # Errors
    /// Returns the last error produced by `op`.
    pub async fn with_permit<T, F, Fut>(
        &self,
        attempts: u32,
        backoff: &BackoffConfig,
        label: &str,
        op: F,
    ) -> Result<T, BackfillError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackfillError>>,
    {
        retry_with_backoff(Some(self), attempts, backoff, label, op).await
    }
}

/// Apply percentage jitter on top of a base delay to avoid synchronized
/// retry storms across workers.
fn jittered(base: Duration, jitter_percent: u8) -> Duration {
    if jitter_percent == 0 {
        return base;
    }
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let range = std::cmp::max(1, base_ms.saturating_mul(u64::from(jitter_percent)) / 100);
    let mut rng = rand::rng();
    Duration::from_millis(base_ms.saturating_add(rng.random_range(0..range)))
}

/// Retry `op` up to `attempts` times, sleeping `base * 2^attempt` (with
/// jitter) between tries, acquiring a limiter permit before each try when a
/// limiter is present.
///
/// # Errors
/// Returns the last error produced by `op` once attempts are exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    limiter: Option<&RateLimiter>,
    attempts: u32,
    backoff: &BackoffConfig,
    label: &str,
    mut op: F,
) -> Result<T, BackfillError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackfillError>>,
{
    debug_assert!(attempts > 0);
    let mut last_err = None;
    for attempt in 0..attempts {
        if let Some(l) = limiter {
            l.acquire().await;
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt + 1 < attempts {
                    let delay = jittered(backoff.delay_for_attempt(attempt), backoff.jitter_percent);
                    warn!(%label, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| BackfillError::Pipeline(format!("{label}: zero attempts"))))
}
