//! Sliding-window call admission.
//!
//! The provider's quota is expressed as calls per minute. A [`RateLimiter`]
//! remembers when each admitted call started and refuses a new one while the
//! last `window` already holds `max_calls` admissions. Share one limiter (via
//! `Arc`) across every gateway that draws on the same quota.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::clock::{Clock, TokioClock};
use super::error::PredictionError;

/// Calls allowed per window by default (Vertex AI online prediction quota).
pub const DEFAULT_CALLS_PER_WINDOW: usize = 50;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    admitted: Mutex<VecDeque<Instant>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_calls", &self.max_calls)
            .field("window", &self.window)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CALLS_PER_WINDOW, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// At most `max_calls` (minimum 1) in any rolling `window`.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self::with_clock(max_calls, window, Arc::new(TokioClock))
    }

    pub fn with_clock(max_calls: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            clock,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit a call now or report how long until a slot frees up.
    pub fn try_acquire(&self) -> Result<(), PredictionError> {
        self.admit().map_err(PredictionError::rate_limited_local)
    }

    /// Wait until a slot is free, then take it. Returns the total time waited.
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            match self.admit() {
                Ok(()) => return waited,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "rate limiter full; delaying call");
                    self.clock.sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Admissions still inside the current window.
    pub fn in_window(&self) -> usize {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        evict(&mut admitted, now, self.window);
        admitted.len()
    }

    fn admit(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        evict(&mut admitted, now, self.window);

        if admitted.len() < self.max_calls {
            admitted.push_back(now);
            return Ok(());
        }

        let oldest = admitted.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }
}

fn evict(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = admitted.front() {
        if now.duration_since(front) >= window {
            admitted.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::clock::ManualClock;

    fn limiter(max_calls: usize, clock: &ManualClock) -> RateLimiter {
        RateLimiter::with_clock(max_calls, Duration::from_secs(60), Arc::new(clock.clone()))
    }

    #[test]
    fn admits_up_to_limit_then_reports_wait() {
        let clock = ManualClock::new();
        let limiter = limiter(3, &clock);

        for _ in 0..3 {
            limiter.try_acquire().unwrap();
        }
        clock.advance(Duration::from_secs(15));

        match limiter.try_acquire() {
            Err(PredictionError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(45));
            }
            other => panic!("expected local rate limit, got {other:?}"),
        }
        assert_eq!(limiter.in_window(), 3);
    }

    #[test]
    fn window_slides_one_admission_at_a_time() {
        let clock = ManualClock::new();
        let limiter = limiter(3, &clock);

        limiter.try_acquire().unwrap(); // t=0
        clock.advance(Duration::from_secs(20));
        limiter.try_acquire().unwrap(); // t=20
        clock.advance(Duration::from_secs(20));
        limiter.try_acquire().unwrap(); // t=40

        clock.advance(Duration::from_secs(10)); // t=50
        assert!(limiter.try_acquire().is_err());

        clock.advance(Duration::from_secs(10)); // t=60, first admission expires
        limiter.try_acquire().unwrap();

        clock.advance(Duration::from_secs(1)); // t=61
        match limiter.try_acquire() {
            Err(PredictionError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(19));
            }
            other => panic!("expected local rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn acquire_delays_instead_of_failing() {
        let clock = ManualClock::new();
        let limiter = limiter(2, &clock);

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.acquire().await, Duration::ZERO);

        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_secs(55));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(55)]);
        assert_eq!(limiter.in_window(), 2);
    }

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let clock = ManualClock::new();
        let limiter = limiter(0, &clock);
        assert_eq!(limiter.max_calls(), 1);
        limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_err());
    }
}
