//! Deterministic time doubles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::runtime::Sleeper;

/// Wall clock that only moves when told to.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Start the clock at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Move the clock forward; durations beyond `TimeDelta::MAX` saturate.
    pub fn advance(&self, delta: Duration) {
        let step = TimeDelta::from_std(delta).unwrap_or(TimeDelta::MAX);
        let mut now = self.lock_clock();
        *now = now.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Jump straight to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock_clock() = now;
    }

    // A test that panicked while holding the lock leaves a usable timestamp.
    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Sleeper that returns at once after moving a [`MutableClock`] forward.
pub struct AdvancingSleeper {
    clock: Arc<MutableClock>,
    slept: Mutex<Vec<Duration>>,
}

impl AdvancingSleeper {
    /// Sleep against `clock`, recording every requested duration.
    #[must_use]
    pub const fn new(clock: Arc<MutableClock>) -> Self {
        Self {
            clock,
            slept: Mutex::new(Vec::new()),
        }
    }

    /// Every duration slept so far, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Duration> {
        self.lock_slept().clone()
    }

    fn lock_slept(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.slept.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sleeper for AdvancingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.lock_slept().push(duration);
        self.clock.advance(duration);
        tokio::task::yield_now().await;
    }
}
