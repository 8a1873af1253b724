//! Retry and admission policy around a single prediction call.
//!
//! [`InvocationPolicy`] composes two pieces:
//! - a [`RateLimiter`] that every attempt must pass before it is sent;
//! - a [`BackoffPolicy`] that retries quota and rate failures with doubling
//!   waits until a total time budget is spent.
//!
//! Any other failure is returned after the first attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::clock::{Clock, TokioClock};
use super::error::PredictionError;
use super::rate_limit::{RateLimiter, DEFAULT_CALLS_PER_WINDOW, DEFAULT_WINDOW};

/// Exponential backoff without jitter, bounded by total elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Wait before the first retry; doubles for every retry after that.
    pub base_delay: Duration,
    /// Total time, from the first attempt, after which retryable failures
    /// become permanent.
    pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry.min(20));
        self.base_delay.saturating_mul(multiplier)
    }
}

/// Tunables for [`InvocationPolicy::from_config`].
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    pub calls_per_window: usize,
    pub window: Duration,
    pub base_delay: Duration,
    pub max_elapsed: Duration,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            calls_per_window: DEFAULT_CALLS_PER_WINDOW,
            window: DEFAULT_WINDOW,
            base_delay: backoff.base_delay,
            max_elapsed: backoff.max_elapsed,
        }
    }
}

impl InvocationConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: self.base_delay,
            max_elapsed: self.max_elapsed,
        }
    }
}

/// Admission plus retry, applied through a single [`invoke`](Self::invoke).
#[derive(Clone)]
pub struct InvocationPolicy {
    backoff: BackoffPolicy,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InvocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationPolicy")
            .field("backoff", &self.backoff)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self::from_config(&InvocationConfig::default())
    }
}

impl InvocationPolicy {
    pub fn new(backoff: BackoffPolicy, limiter: Arc<RateLimiter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backoff,
            limiter,
            clock,
        }
    }

    /// Wall-clock policy with its own limiter.
    pub fn from_config(config: &InvocationConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let limiter = Arc::new(RateLimiter::with_clock(
            config.calls_per_window,
            config.window,
            clock.clone(),
        ));
        Self::new(config.backoff(), limiter, clock)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run `call` under admission control, retrying quota and rate failures.
    ///
    /// `call` receives the one-based attempt number.
    pub async fn invoke<T, F, Fut>(&self, mut call: F) -> Result<T, PredictionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PredictionError>>,
    {
        let start = self.clock.now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let err = match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            let elapsed = self.clock.now().duration_since(start);
            let remaining = self.backoff.max_elapsed.saturating_sub(elapsed);
            if remaining.is_zero() {
                return Err(PredictionError::RetryBudgetExhausted {
                    attempts: attempt,
                    elapsed,
                    source: Box::new(err),
                });
            }

            let wait = self.backoff.delay_for(attempt - 1).min(remaining);
            warn!(
                wait_secs = wait.as_secs_f64(),
                tries = attempt,
                code = err.code(),
                "backing off {:.1} seconds after {} tries",
                wait.as_secs_f64(),
                attempt
            );
            self.clock.sleep(wait).await;
        }
    }
}
