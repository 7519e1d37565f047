//! Restartable periodic timer driving scheduled work.
//!
//! A [`PeriodicClock`] owns at most one tokio task. Ticks run the callback
//! to completion before the next tick is awaited, so a slow callback delays
//! the schedule instead of overlapping with itself.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Callback invoked on every tick.
pub type TickCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Whether the clock is ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// No tick task is running.
    Stopped,
    /// The tick task is running.
    Started,
}

/// Periodic timer that can be stopped and restarted at any moment.
pub struct PeriodicClock {
    callback: TickCallback,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicClock {
    /// Build a clock ticking every `interval`.
    ///
    /// Unless `start_paused` is set the clock starts at once, invoking the
    /// callback immediately when `run_immediately` is set. Starting requires
    /// a tokio runtime.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// use futures_util::FutureExt;
    /// use watchlist_backend::domain::periodic_clock::{ClockState, PeriodicClock};
    ///
    /// let clock = PeriodicClock::new(
    ///     Arc::new(|| async {}.boxed()),
    ///     Duration::from_secs(60),
    ///     false,
    ///     true,
    /// );
    /// assert_eq!(clock.state(), ClockState::Stopped);
    /// ```
    #[must_use]
    pub fn new(
        callback: TickCallback,
        interval: Duration,
        run_immediately: bool,
        start_paused: bool,
    ) -> Self {
        let clock = Self {
            callback,
            interval: interval.max(Duration::from_millis(1)),
            task: Mutex::new(None),
        };
        if !start_paused {
            clock.start_with(run_immediately);
        }
        clock
    }

    /// Tick period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking; the first tick fires one interval from now.
    pub fn start(&self) {
        self.start_with(false);
    }

    /// Start ticking, optionally invoking the callback right away.
    ///
    /// A running clock is restarted, so the schedule realigns to now.
    pub fn start_with(&self, call_at_start: bool) {
        let callback = self.callback.clone();
        let interval = self.interval;
        let first_tick = if call_at_start {
            Instant::now()
        } else {
            Instant::now() + interval
        };

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback().await;
            }
        });

        if let Some(previous) = self.lock_task().replace(task) {
            previous.abort();
        }
        debug!(interval_ms = interval.as_millis(), "periodic clock started");
    }

    /// Stop ticking. A tick already running is cancelled at its next
    /// suspension point.
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
            debug!("periodic clock stopped");
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClockState {
        match self.lock_task().as_ref() {
            Some(task) if !task.is_finished() => ClockState::Started,
            _ => ClockState::Stopped,
        }
    }

    /// Move to `state`: `Started` (re)starts, `Stopped` stops.
    pub fn set_state(&self, state: ClockState) {
        match state {
            ClockState::Started => self.start(),
            ClockState::Stopped => self.stop(),
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PeriodicClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::FutureExt;
    use rstest::rstest;

    use super::*;

    fn counting_callback() -> (TickCallback, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let callback: TickCallback = Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        (callback, ticks)
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_interval() {
        let (callback, ticks) = counting_callback();
        let clock = PeriodicClock::new(callback, Duration::from_secs(10), false, false);

        advance(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(26)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(clock.state(), ClockState::Started);
    }

    #[rstest]
    #[case::immediate(true, 1)]
    #[case::deferred(false, 0)]
    #[tokio::test(start_paused = true)]
    async fn run_immediately_controls_first_tick(
        #[case] run_immediately: bool,
        #[case] expected: usize,
    ) {
        let (callback, ticks) = counting_callback();
        let _clock = PeriodicClock::new(callback, Duration::from_secs(10), run_immediately, false);

        advance(Duration::from_millis(1)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_clock_does_not_tick_until_started() {
        let (callback, ticks) = counting_callback();
        let clock = PeriodicClock::new(callback, Duration::from_secs(10), true, true);

        advance(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_eq!(clock.state(), ClockState::Stopped);

        clock.set_state(ClockState::Started);
        advance(Duration::from_secs(11)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_ticks_and_start_resumes() {
        let (callback, ticks) = counting_callback();
        let clock = PeriodicClock::new(callback, Duration::from_secs(10), false, false);

        advance(Duration::from_secs(11)).await;
        clock.stop();
        assert_eq!(clock.state(), ClockState::Stopped);
        advance(Duration::from_secs(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        clock.start_with(true);
        advance(Duration::from_millis(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_do_not_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let (running_in, overlaps_in) = (running.clone(), overlaps.clone());
        let callback: TickCallback = Arc::new(move || {
            let running = running_in.clone();
            let overlaps = overlaps_in.clone();
            async move {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_secs(25)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
            .boxed()
        });
        let _clock = PeriodicClock::new(callback, Duration::from_secs(10), true, false);

        advance(Duration::from_secs(120)).await;

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
