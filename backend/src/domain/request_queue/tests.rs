//! Behavioural coverage for lanes, pausing and the shared rate budget.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mockable::Clock;
use rstest::{fixture, rstest};
use serde_json::json;
use url::Url;

use super::*;
use crate::domain::ports::MockOutboundExecutor;
use crate::test_support::clock::{AdvancingSleeper, MutableClock};

/// Executor that records the `id` parameter and the clock reading of each
/// call. Requests carrying `fail` are rejected, `stall` never complete and
/// `panic` panic mid-call.
struct RecordingExecutor {
    clock: Arc<dyn Clock>,
    calls: Mutex<Vec<(String, i64)>>,
}

impl RecordingExecutor {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls mutex")
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn timestamps_ms(&self) -> Vec<i64> {
        self.calls
            .lock()
            .expect("calls mutex")
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait::async_trait]
impl OutboundExecutor for RecordingExecutor {
    async fn execute(&self, request: &OutboundRequest) -> Result<OutboundResponse, OutboundError> {
        let id = request.param("id").unwrap_or_default().to_owned();
        self.calls
            .lock()
            .expect("calls mutex")
            .push((id.clone(), self.clock.utc().timestamp_millis()));
        if request.param("stall").is_some() {
            std::future::pending::<()>().await;
        }
        assert!(request.param("panic").is_none(), "executor bug on call {id}");
        if request.param("fail").is_some() {
            return Err(OutboundError::rejected(500_u16, format!("call {id} failed")));
        }
        Ok(OutboundResponse {
            status: 200,
            body: json!({ "id": id }),
        })
    }
}

struct Harness {
    clock: Arc<MutableClock>,
    limiter: Arc<RateLimiter>,
    executor: Arc<RecordingExecutor>,
}

impl Harness {
    fn queue(&self, lanes: usize) -> RequestQueue {
        RequestQueue::new(
            "test",
            self.executor.clone(),
            self.limiter.clone(),
            QueueConfig {
                lanes,
                ..QueueConfig::default()
            },
        )
    }

    fn limited(limit: u32) -> Self {
        let start = Utc
            .timestamp_millis_opt(1_700_000_000_000)
            .single()
            .expect("valid timestamp");
        let clock = Arc::new(MutableClock::new(start));
        let sleeper = Arc::new(AdvancingSleeper::new(clock.clone()));
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(1000),
            limit,
            clock.clone(),
            sleeper,
        ));
        let executor = Arc::new(RecordingExecutor::new(clock.clone()));
        Self {
            clock,
            limiter,
            executor,
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::limited(200)
}

fn request(id: usize) -> OutboundRequest {
    let url = Url::parse("https://example.org/w/api.php").expect("valid url");
    OutboundRequest::new(url).with_param("id", id.to_string())
}

#[rstest]
#[tokio::test]
async fn single_lane_executes_in_enqueue_order(harness: Harness) {
    let queue = harness.queue(1);

    let handles: Vec<_> = (0..5).map(|id| queue.enqueue(request(id))).collect();
    for handle in handles {
        handle.await.expect("call succeeds");
    }

    assert_eq!(harness.executor.ids(), vec!["0", "1", "2", "3", "4"]);
}

#[rstest]
#[tokio::test]
async fn enqueue_picks_least_loaded_lane_with_low_index_ties(harness: Harness) {
    let queue = harness.queue(3);
    queue.pause();

    let _handles: Vec<_> = (0..4).map(|id| queue.enqueue(request(id))).collect();

    assert_eq!(queue.pending_counts(), vec![2, 1, 1]);
}

#[rstest]
#[tokio::test]
async fn lane_running_a_stalled_call_is_not_chosen(harness: Harness) {
    let queue = harness.queue(3);

    let _stalled = queue.enqueue(request(1).with_param("stall", "1"));
    for _ in 0..10 {
        if !harness.executor.ids().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.executor.ids(), vec!["1"]);
    assert_eq!(queue.pending_counts(), vec![0, 0, 0]);

    let response = tokio::time::timeout(Duration::from_secs(2), queue.enqueue(request(2)))
        .await
        .expect("an idle lane serves the request")
        .expect("call succeeds");

    assert_eq!(response.body, json!({ "id": "2" }));
    assert_eq!(queue.lane_states().first(), Some(&LaneState::Active));
}

#[rstest]
#[tokio::test]
async fn queued_work_counts_behind_a_running_call(harness: Harness) {
    let queue = harness.queue(2);

    let _stalled = queue.enqueue(request(1).with_param("stall", "1"));
    for _ in 0..10 {
        if !harness.executor.ids().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    queue.pause_lane(1).expect("lane exists");
    let _handles: Vec<_> = (2..5).map(|id| queue.enqueue(request(id))).collect();

    assert_eq!(queue.pending_counts(), vec![1, 2]);
}

#[rstest]
#[tokio::test]
async fn panicking_executor_fails_only_its_own_call(harness: Harness) {
    let queue = harness.queue(1);

    let panicking = queue.enqueue(request(1).with_param("panic", "1"));
    let next = queue.enqueue(request(2));

    assert_eq!(panicking.await, Err(QueueError::ExecutorPanicked));
    let response = tokio::time::timeout(Duration::from_secs(2), next)
        .await
        .expect("lane keeps draining after a panic")
        .expect("call succeeds");
    assert_eq!(response.body, json!({ "id": "2" }));

    let later = queue.enqueue(request(3)).await;
    assert!(later.is_ok());
    assert_eq!(harness.executor.ids(), vec!["1", "2", "3"]);
}

#[rstest]
#[tokio::test]
async fn handle_resolves_with_its_own_response(harness: Harness) {
    let queue = harness.queue(3);

    let response = queue.enqueue(request(7)).await.expect("call succeeds");

    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({ "id": "7" }));
}

#[rstest]
#[tokio::test]
async fn failed_call_rejects_only_its_own_handle(harness: Harness) {
    let queue = harness.queue(1);

    let first = queue.enqueue(request(1));
    let failing = queue.enqueue(request(2).with_param("fail", "1"));
    let last = queue.enqueue(request(3));

    assert!(first.await.is_ok());
    assert!(matches!(
        failing.await,
        Err(QueueError::Outbound(OutboundError::Rejected { status: 500, .. }))
    ));
    assert!(last.await.is_ok());
}

#[rstest]
#[tokio::test]
async fn paused_lanes_hold_work_until_resumed(harness: Harness) {
    let queue = harness.queue(2);
    queue.pause();

    let handle = queue.enqueue(request(1));
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(harness.executor.ids().is_empty());
    assert_eq!(queue.lane_states(), vec![LaneState::Paused, LaneState::Paused]);

    queue.resume();
    handle.await.expect("call succeeds");
    assert_eq!(harness.executor.ids(), vec!["1"]);
}

#[rstest]
#[tokio::test]
async fn pausing_one_lane_leaves_others_running(harness: Harness) {
    let queue = harness.queue(2);
    queue.pause_lane(0).expect("lane exists");

    let held = queue.enqueue(request(1));
    let running = queue.enqueue(request(2));
    running.await.expect("call succeeds");

    assert_eq!(harness.executor.ids(), vec!["2"]);
    queue.resume_lane(0).expect("lane exists");
    held.await.expect("call succeeds");
}

#[rstest]
fn lane_control_rejects_unknown_index(harness: Harness) {
    let queue = harness.queue(2);

    assert_eq!(queue.pause_lane(2), Err(QueueError::UnknownLane { index: 2 }));
    assert_eq!(queue.resume_lane(9), Err(QueueError::UnknownLane { index: 9 }));
}

#[rstest]
#[tokio::test]
async fn lanes_return_to_inactive_after_draining(harness: Harness) {
    let queue = harness.queue(2);

    queue.enqueue(request(1)).await.expect("call succeeds");
    for _ in 0..10 {
        if queue.lane_states() == vec![LaneState::Inactive; 2] {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(queue.lane_states(), vec![LaneState::Inactive; 2]);
}

#[rstest]
#[tokio::test]
async fn dropped_handles_are_skipped(harness: Harness) {
    let queue = harness.queue(1);
    queue.pause();

    drop(queue.enqueue(request(1)));
    let kept = queue.enqueue(request(2));
    queue.resume();
    kept.await.expect("call succeeds");

    assert_eq!(harness.executor.ids(), vec!["2"]);
}

#[rstest]
#[tokio::test]
async fn backlog_beyond_warning_threshold_still_enqueues(harness: Harness) {
    let queue = harness.queue(1);
    queue.pause();

    let _handles: Vec<_> = (0..DEFAULT_BACKLOG_WARNING + 5)
        .map(|id| queue.enqueue(request(id)))
        .collect();

    assert_eq!(queue.pending_counts(), vec![DEFAULT_BACKLOG_WARNING + 5]);
}

#[tokio::test]
async fn shared_limiter_caps_calls_per_window_across_queues() {
    let harness = Harness::limited(2);
    let queues = OutboundQueues::new(
        harness.executor.clone(),
        harness.limiter.clone(),
        QueueConfig::default(),
    );

    let mut handles = Vec::new();
    for id in 0..7_usize {
        let priority = if id.rem_euclid(2) == 0 {
            QueuePriority::Foreground
        } else {
            QueuePriority::Background
        };
        handles.push(queues.for_priority(priority).enqueue(request(id)));
    }
    for handle in handles {
        handle.await.expect("call succeeds");
    }

    let start = 1_700_000_000_000_i64;
    let mut per_window = std::collections::BTreeMap::new();
    for at in harness.executor.timestamps_ms() {
        *per_window.entry((at - start).div_euclid(1000)).or_insert(0) += 1;
    }
    assert_eq!(harness.executor.ids().len(), 7);
    assert!(per_window.values().all(|count| *count <= 2), "{per_window:?}");
    assert!(harness.clock.utc().timestamp_millis() >= start + 3000);
}

#[tokio::test]
async fn executor_errors_surface_through_the_handle() {
    let mut executor = MockOutboundExecutor::new();
    executor
        .expect_execute()
        .times(1)
        .returning(|_| Err(OutboundError::timeout("30s elapsed")));
    let harness = Harness::limited(10);
    let queue = RequestQueue::new(
        "mocked",
        Arc::new(executor),
        harness.limiter.clone(),
        QueueConfig::default(),
    );

    let outcome = queue.enqueue(request(1)).await;

    assert_eq!(
        outcome,
        Err(QueueError::Outbound(OutboundError::timeout("30s elapsed")))
    );
}

#[rstest]
#[case(SyncTrigger::Manual, QueuePriority::Foreground)]
#[case(SyncTrigger::Scheduled, QueuePriority::Background)]
fn trigger_maps_to_queue_priority(#[case] trigger: SyncTrigger, #[case] expected: QueuePriority) {
    assert_eq!(QueuePriority::from(trigger), expected);
}
