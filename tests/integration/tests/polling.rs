//! Idle backoff, health and the autoscaler termination signal.

use std::time::Duration;

use chrono::Utc;
use lease_queue_worker::queues::QueueError;
use lease_queue_worker::scheduler::{Health, SchedulerState};

use crate::integration::common::harness::{eventually, Harness};
use crate::integration::common::logging::init_test_logging;

const IDLE_THRESHOLD: Duration = Duration::from_secs(300);

#[tokio::test(start_paused = true)]
async fn test_empty_polls_back_off_exponentially_to_cap() {
    init_test_logging();
    let h = Harness::new();
    let mut worker = h.start();

    let expected = [2, 4, 8, 16, 30, 30];
    for (i, secs) in expected.iter().enumerate() {
        let polls = i as u32 + 1;
        let status = worker
            .wait_for(|s| s.consecutive_empty_polls == polls)
            .await;
        assert_eq!(status.state, SchedulerState::IdleBackoff);
        assert_eq!(status.current_backoff, Duration::from_secs(*secs));
    }

    let state = worker.stop().await;
    assert_eq!(h.queue.receive_calls(), 6);
    assert_eq!(state.consecutive_empty_polls, 6);
}

#[tokio::test(start_paused = true)]
async fn test_work_resets_backoff() {
    init_test_logging();
    let h = Harness::new();
    let mut worker = h.start();
    worker.wait_for(|s| s.consecutive_empty_polls == 3).await;

    h.queue.send_with_id("a", "{}");
    eventually(|| h.queue.is_empty()).await;

    let status = worker
        .wait_for(|s| s.state == SchedulerState::IdleBackoff)
        .await;
    assert_eq!(status.consecutive_empty_polls, 1);
    assert_eq!(status.current_backoff, Duration::from_secs(2));
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_worker_reports_safe_to_terminate() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    let mut worker = h.start();

    let status = worker.wait_idle().await;
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.health, Health::Healthy);
    assert!(!status.safe_to_terminate_at(IDLE_THRESHOLD, Utc::now()));

    let later = Utc::now() + chrono::Duration::seconds(301);
    assert!(status.safe_to_terminate_at(IDLE_THRESHOLD, later));
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_outage_degrades_health_without_stopping() {
    init_test_logging();
    let h = Harness::new();
    for _ in 0..3 {
        h.queue
            .fail_next_receive(QueueError::Throttled("slow down".into()));
    }
    h.queue.send_with_id("a", "{}");

    let mut worker = h.start();
    let degraded = worker.wait_for(|s| s.health == Health::Degraded).await;
    assert!(!degraded.safe_to_terminate_at(IDLE_THRESHOLD, Utc::now()));

    worker
        .wait_for(|s| s.health == Health::Healthy && s.state == SchedulerState::IdleBackoff)
        .await;
    assert!(h.queue.is_empty());
    assert_eq!(h.handler.calls_for("a"), 1);
    worker.stop().await;
}
