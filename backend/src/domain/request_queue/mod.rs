//! Multi-lane outbound request queue sharing one rate budget.
//!
//! Every enqueued request lands in the least loaded lane, where load counts
//! the waiting items plus the call the lane is running (ties go to the
//! lowest index). A lane stalled on one call therefore stops attracting new
//! work while idle lanes exist. Each lane drains in FIFO order on its own
//! tokio task, reserving rate-limiter capacity before every call, so lanes
//! run in parallel without pushing a window over its cap. There is no
//! ordering across lanes.
//!
//! Callers receive a [`PendingResponse`] which resolves exactly once with the
//! outcome of their own call; one failing call never affects its siblings.

mod lane;
pub mod rate_limiter;
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};
use tracing::warn;

use crate::domain::SyncTrigger;
use crate::domain::ports::{OutboundError, OutboundExecutor, OutboundRequest, OutboundResponse};

pub use lane::LaneState;
pub use rate_limiter::RateLimiter;

/// Pending count above which enqueue logs a backlog warning.
pub const DEFAULT_BACKLOG_WARNING: usize = 50;

/// Default number of lanes per queue.
pub const DEFAULT_LANES: usize = 3;

/// Which queue a call should go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePriority {
    /// User-triggered work.
    Foreground,
    /// Scheduled work.
    Background,
}

impl From<SyncTrigger> for QueuePriority {
    fn from(trigger: SyncTrigger) -> Self {
        match trigger {
            SyncTrigger::Manual => Self::Foreground,
            SyncTrigger::Scheduled => Self::Background,
        }
    }
}

/// Queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of lanes; raised to one when zero.
    pub lanes: usize,
    /// Pending count above which a lane logs a backlog warning.
    pub backlog_warning: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
            backlog_warning: DEFAULT_BACKLOG_WARNING,
        }
    }
}

/// Errors resolved through a [`PendingResponse`] or returned by lane control.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The executor failed this call.
    #[error(transparent)]
    Outbound(#[from] OutboundError),
    /// The queue went away before the call ran.
    #[error("request was dropped before it produced a response")]
    Abandoned,
    /// The executor panicked while running this call; the lane keeps going.
    #[error("outbound executor panicked while running the request")]
    ExecutorPanicked,
    /// Lane control addressed a lane that does not exist.
    #[error("queue has no lane {index}")]
    UnknownLane {
        /// Requested lane index.
        index: usize,
    },
}

type Responder = oneshot::Sender<Result<OutboundResponse, QueueError>>;

/// One request waiting in a lane together with its single-use responder.
pub struct QueuedRequest {
    request: OutboundRequest,
    responder: Responder,
}

#[derive(Default)]
struct Lane {
    pending: VecDeque<QueuedRequest>,
    draining: bool,
    in_flight: bool,
}

impl Lane {
    fn load(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight)
    }
}

struct QueueInner {
    name: &'static str,
    executor: Arc<dyn OutboundExecutor>,
    limiter: Arc<RateLimiter>,
    lanes: Mutex<Vec<Lane>>,
    paused: Vec<watch::Sender<bool>>,
    backlog_warning: usize,
}

impl QueueInner {
    fn lock_lanes(&self) -> MutexGuard<'_, Vec<Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a queued call; resolves once the call has run.
#[must_use = "dropping the handle cancels interest in the response"]
pub struct PendingResponse {
    receiver: oneshot::Receiver<Result<OutboundResponse, QueueError>>,
}

impl Future for PendingResponse {
    type Output = Result<OutboundResponse, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Abandoned),
        })
    }
}

/// Rate-limited, load-balanced outbound request queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Build a queue named `name` for logs.
    #[must_use]
    pub fn new(
        name: &'static str,
        executor: Arc<dyn OutboundExecutor>,
        limiter: Arc<RateLimiter>,
        config: QueueConfig,
    ) -> Self {
        let lane_count = config.lanes.max(1);
        let lanes = (0..lane_count).map(|_| Lane::default()).collect();
        let paused = (0..lane_count).map(|_| watch::Sender::new(false)).collect();
        Self {
            inner: Arc::new(QueueInner {
                name,
                executor,
                limiter,
                lanes: Mutex::new(lanes),
                paused,
                backlog_warning: config.backlog_warning,
            }),
        }
    }

    /// Queue name used in log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Number of lanes.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.inner.paused.len()
    }

    /// Append `request` to the least loaded lane.
    ///
    /// Never blocks. Must be called inside a tokio runtime because an idle
    /// lane starts its drain task here.
    pub fn enqueue(&self, request: OutboundRequest) -> PendingResponse {
        let (responder, receiver) = oneshot::channel();
        if let Some(index) = self.place(QueuedRequest { request, responder }) {
            tokio::spawn(lane::drain(self.inner.clone(), index));
        }
        PendingResponse { receiver }
    }

    /// Push `item` onto the least loaded lane and return the lane index when
    /// its drain task must be started.
    fn place(&self, item: QueuedRequest) -> Option<usize> {
        let mut lanes = self.inner.lock_lanes();
        let (index, lane) = lanes
            .iter_mut()
            .enumerate()
            .min_by_key(|(_, lane)| lane.load())?;
        lane.pending.push_back(item);
        let pending = lane.pending.len();
        if pending > self.inner.backlog_warning {
            warn!(
                queue = self.inner.name,
                lane = index,
                pending,
                "request queue lane backlog"
            );
        }
        if lane.draining {
            return None;
        }
        lane.draining = true;
        Some(index)
    }

    /// Pending (not yet started) items per lane.
    #[must_use]
    pub fn pending_counts(&self) -> Vec<usize> {
        self.inner
            .lock_lanes()
            .iter()
            .map(|lane| lane.pending.len())
            .collect()
    }

    /// Current state of every lane.
    #[must_use]
    pub fn lane_states(&self) -> Vec<LaneState> {
        let lanes = self.inner.lock_lanes();
        lanes
            .iter()
            .zip(&self.inner.paused)
            .map(|(lane, paused)| LaneState::from_flags(*paused.borrow(), lane.draining))
            .collect()
    }

    /// Stop every lane from starting new calls.
    pub fn pause(&self) {
        for flag in &self.inner.paused {
            flag.send_replace(true);
        }
    }

    /// Let every lane start calls again.
    pub fn resume(&self) {
        for flag in &self.inner.paused {
            flag.send_replace(false);
        }
    }

    /// Pause lane `index`; calls already running complete normally.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownLane`] when `index` is out of range.
    pub fn pause_lane(&self, index: usize) -> Result<(), QueueError> {
        self.lane_flag(index)?.send_replace(true);
        Ok(())
    }

    /// Resume lane `index`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownLane`] when `index` is out of range.
    pub fn resume_lane(&self, index: usize) -> Result<(), QueueError> {
        self.lane_flag(index)?.send_replace(false);
        Ok(())
    }

    fn lane_flag(&self, index: usize) -> Result<&watch::Sender<bool>, QueueError> {
        self.inner
            .paused
            .get(index)
            .ok_or(QueueError::UnknownLane { index })
    }
}

/// Foreground and background queues sharing one rate limiter.
#[derive(Clone)]
pub struct OutboundQueues {
    /// Queue for user-triggered work.
    pub foreground: RequestQueue,
    /// Queue for scheduled work.
    pub background: RequestQueue,
}

impl OutboundQueues {
    /// Build both queues over the same executor and limiter.
    #[must_use]
    pub fn new(
        executor: Arc<dyn OutboundExecutor>,
        limiter: Arc<RateLimiter>,
        config: QueueConfig,
    ) -> Self {
        Self {
            foreground: RequestQueue::new("foreground", executor.clone(), limiter.clone(), config),
            background: RequestQueue::new("background", executor, limiter, config),
        }
    }

    /// Queue serving `priority`.
    #[must_use]
    pub const fn for_priority(&self, priority: QueuePriority) -> &RequestQueue {
        match priority {
            QueuePriority::Foreground => &self.foreground,
            QueuePriority::Background => &self.background,
        }
    }

    /// Pause both queues.
    pub fn pause_all(&self) {
        self.foreground.pause();
        self.background.pause();
    }
}
