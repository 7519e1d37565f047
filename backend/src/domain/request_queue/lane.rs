//! Per-lane drain task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, warn};

use super::{QueueError, QueueInner, QueuedRequest};
use crate::domain::ports::{OutboundRequest, OutboundResponse};

/// Observable lane state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    /// No drain task is running.
    Inactive,
    /// A drain task is running or about to run.
    Active,
    /// The lane will not start new calls until resumed.
    Paused,
}

impl LaneState {
    pub(super) const fn from_flags(paused: bool, draining: bool) -> Self {
        match (paused, draining) {
            (true, _) => Self::Paused,
            (false, true) => Self::Active,
            (false, false) => Self::Inactive,
        }
    }
}

/// Run lane `index` until it has nothing left to do.
///
/// Only one drain task exists per lane: `enqueue` starts one when the
/// lane's `draining` flag is clear, and this function clears the flag under
/// the same lock that observed the empty lane. A panicking executor fails
/// only the call that panicked.
pub(super) async fn drain(inner: Arc<QueueInner>, index: usize) {
    let Some(flag) = inner.paused.get(index) else {
        return;
    };
    let mut paused = flag.subscribe();
    debug!(queue = inner.name, lane = index, "lane active");

    loop {
        // The sender lives in `inner`, which this task keeps alive.
        drop(paused.wait_for(|is_paused| !*is_paused).await);

        let Some(QueuedRequest { request, responder }) = next_item(&inner, index) else {
            debug!(queue = inner.name, lane = index, "lane inactive");
            return;
        };

        inner.limiter.admit().await;
        let outcome = run_call(&inner, index, &request).await;
        finish_call(&inner, index);
        if responder.send(outcome).is_err() {
            debug!(queue = inner.name, lane = index, "caller stopped waiting");
        }
    }
}

async fn run_call(
    inner: &QueueInner,
    index: usize,
    request: &OutboundRequest,
) -> Result<OutboundResponse, QueueError> {
    let call = AssertUnwindSafe(async { inner.executor.execute(request).await });
    let Ok(outcome) = call.catch_unwind().await else {
        warn!(queue = inner.name, lane = index, "outbound executor panicked");
        return Err(QueueError::ExecutorPanicked);
    };
    outcome.map_err(|error| {
        debug!(queue = inner.name, lane = index, %error, "outbound call failed");
        QueueError::from(error)
    })
}

/// Pop the next live item, skipping handles whose caller went away, and
/// mark the lane busy with it. Clears `draining` when nothing is left.
fn next_item(inner: &QueueInner, index: usize) -> Option<QueuedRequest> {
    let mut lanes = inner.lock_lanes();
    let lane = lanes.get_mut(index)?;
    let item = loop {
        match lane.pending.pop_front() {
            Some(skipped) if skipped.responder.is_closed() => {}
            next => break next,
        }
    };
    lane.in_flight = item.is_some();
    if item.is_none() {
        lane.draining = false;
    }
    item
}

fn finish_call(inner: &QueueInner, index: usize) {
    if let Some(lane) = inner.lock_lanes().get_mut(index) {
        lane.in_flight = false;
    }
}
