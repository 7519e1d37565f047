//! Fixed-window rate limiter with wall-clock aligned windows.
//!
//! A window starts at every multiple of its duration since the Unix epoch,
//! so two limiters with the same window agree on boundaries. Counts reset
//! lazily the first time the limiter is touched in a new window.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mockable::Clock;

use crate::domain::runtime::Sleeper;

#[derive(Debug, Default)]
struct WindowState {
    window_start_ms: i64,
    count: u32,
}

/// Caps the number of actions per fixed wall-clock window.
pub struct RateLimiter {
    window_ms: i64,
    limit: u32,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Build a limiter allowing `limit` actions per `window`.
    ///
    /// A zero window or zero limit is raised to one so the limiter can always
    /// make progress.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// use mockable::DefaultClock;
    /// use watchlist_backend::domain::request_queue::RateLimiter;
    /// use watchlist_backend::domain::runtime::TokioSleeper;
    ///
    /// let limiter = RateLimiter::new(
    ///     Duration::from_millis(1000),
    ///     2,
    ///     Arc::new(DefaultClock),
    ///     Arc::new(TokioSleeper),
    /// );
    /// assert!(limiter.is_clear());
    /// ```
    #[must_use]
    pub fn new(
        window: Duration,
        limit: u32,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let window_ms = i64::try_from(window.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        Self {
            window_ms,
            limit: limit.max(1),
            clock,
            sleeper,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Maximum actions per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.unsigned_abs())
    }

    /// Record one action in the current window and return the new count.
    ///
    /// Recording is unconditional; callers that must respect the cap use
    /// [`RateLimiter::admit`].
    #[must_use]
    pub fn increment(&self) -> u32 {
        let mut state = self.current_window();
        state.count = state.count.saturating_add(1);
        state.count
    }

    /// Whether the current window is still below its cap.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.current_window().count < self.limit
    }

    /// Record one action only if the window has room.
    #[must_use]
    pub fn try_reserve(&self) -> bool {
        let mut state = self.current_window();
        if state.count >= self.limit {
            return false;
        }
        state.count += 1;
        true
    }

    /// Suspend until the current window ends.
    pub async fn wait_until_clear(&self) {
        let remaining = self.window_ms - self.now_ms().rem_euclid(self.window_ms);
        self.sleeper
            .sleep(Duration::from_millis(remaining.unsigned_abs()))
            .await;
    }

    /// Reserve capacity for one action, waiting for later windows as needed.
    pub async fn admit(&self) {
        while !self.try_reserve() {
            self.wait_until_clear().await;
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.utc().timestamp_millis()
    }

    fn current_window(&self) -> MutexGuard<'_, WindowState> {
        let now_ms = self.now_ms();
        let window_start_ms = now_ms - now_ms.rem_euclid(self.window_ms);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.window_start_ms != window_start_ms {
            state.window_start_ms = window_start_ms;
            state.count = 0;
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::clock::{AdvancingSleeper, MutableClock};
    use chrono::{TimeZone, Utc};
    use rstest::{fixture, rstest};

    struct Harness {
        clock: Arc<MutableClock>,
        sleeper: Arc<AdvancingSleeper>,
        limiter: RateLimiter,
    }

    #[fixture]
    fn harness() -> Harness {
        // 250 ms into a one-second window.
        let start = Utc
            .timestamp_millis_opt(1_700_000_000_250)
            .single()
            .expect("valid timestamp");
        let clock = Arc::new(MutableClock::new(start));
        let sleeper = Arc::new(AdvancingSleeper::new(clock.clone()));
        let limiter = RateLimiter::new(
            Duration::from_millis(1000),
            3,
            clock.clone(),
            sleeper.clone(),
        );
        Harness {
            clock,
            sleeper,
            limiter,
        }
    }

    #[rstest]
    fn increment_counts_within_window(harness: Harness) {
        assert_eq!(harness.limiter.increment(), 1);
        assert_eq!(harness.limiter.increment(), 2);
        assert!(harness.limiter.is_clear());
        assert_eq!(harness.limiter.increment(), 3);
        assert!(!harness.limiter.is_clear());
    }

    #[rstest]
    fn count_resets_on_window_boundary(harness: Harness) {
        let counts: Vec<u32> = (0..3).map(|_| harness.limiter.increment()).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        harness.clock.advance(Duration::from_millis(749));
        assert!(!harness.limiter.is_clear());

        harness.clock.advance(Duration::from_millis(1));
        assert!(harness.limiter.is_clear());
        assert_eq!(harness.limiter.increment(), 1);
    }

    #[rstest]
    fn try_reserve_stops_at_cap(harness: Harness) {
        assert!(harness.limiter.try_reserve());
        assert!(harness.limiter.try_reserve());
        assert!(harness.limiter.try_reserve());
        assert!(!harness.limiter.try_reserve());
    }

    #[rstest]
    #[tokio::test]
    async fn wait_until_clear_sleeps_to_window_end(harness: Harness) {
        harness.limiter.wait_until_clear().await;

        assert_eq!(harness.sleeper.recorded(), vec![Duration::from_millis(750)]);
    }

    #[rstest]
    #[tokio::test]
    async fn admit_never_exceeds_cap_per_window(harness: Harness) {
        let mut windows = Vec::new();
        for _ in 0..7 {
            harness.limiter.admit().await;
            windows.push(harness.clock.utc().timestamp_millis().div_euclid(1000));
        }

        let first = windows[0];
        let per_window: Vec<usize> = (0..3)
            .map(|offset| windows.iter().filter(|w| **w == first + offset).count())
            .collect();
        assert_eq!(per_window, vec![3, 3, 1]);
        assert_eq!(harness.sleeper.recorded().len(), 2);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let limiter = RateLimiter::new(
            Duration::ZERO,
            0,
            Arc::new(mockable::DefaultClock),
            Arc::new(crate::domain::runtime::TokioSleeper),
        );
        assert_eq!(limiter.limit(), 1);
        assert_eq!(limiter.window(), Duration::from_millis(1));
    }
}
