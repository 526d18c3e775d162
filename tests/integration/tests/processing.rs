//! End-to-end processing: redelivery, retries, poison messages and lease sizing.

use std::time::Duration;

use chrono::Utc;
use lease_queue_worker::config::WorkerConfig;
use lease_queue_worker::lease::{LeaseSource, LeaseTimeoutCalculator, LeaseTimeoutPolicy};
use lease_queue_worker::models::{ProcessingDurationSample, ProcessingOutcome};
use lease_queue_worker::queues::LeaseManagedConsumer;
use lease_queue_worker::repositories::{DeadLetterLog, DedupLog, DurationSampleStore};

use crate::integration::common::harness::{
    eventually, test_config, Behavior, Harness, OPERATION,
};
use crate::integration::common::logging::init_test_logging;

#[tokio::test(start_paused = true)]
async fn test_each_message_handled_once_and_deleted() {
    init_test_logging();
    let h = Harness::new();
    for id in ["a", "b", "c"] {
        h.queue.send_with_id(id, format!("{{\"job\":\"{id}\"}}"));
    }

    let mut worker = h.start();
    worker.wait_idle().await;

    assert!(h.queue.is_empty());
    assert_eq!(h.handler.calls().len(), 3);
    assert_eq!(h.dedup_log.record_count(), 3);
    assert_eq!(h.samples.len(OPERATION), 3);
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_after_lost_delete_is_a_duplicate() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    // The delete is acknowledged but the message stays, as when a delete races a lease expiry.
    h.queue.acknowledge_without_deleting(1);

    let mut worker = h.start();
    worker.wait_idle().await;
    assert!(h.queue.contains("a"));
    assert_eq!(h.handler.calls_for("a"), 1);

    h.queue.expire_leases();
    eventually(|| h.queue.is_empty()).await;

    assert_eq!(h.handler.calls_for("a"), 1);
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_durable_log_catches_redelivery_after_restart() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    h.queue.acknowledge_without_deleting(1);

    let mut first = h.start();
    first.wait_idle().await;
    first.stop().await;

    let record = h
        .dedup_log
        .lookup("a", Utc::now())
        .await
        .unwrap()
        .expect("record committed before delete");
    assert_eq!(record.operation_type, OPERATION);

    // A new process has an empty cache; only the durable log knows about "a".
    h.queue.expire_leases();
    let mut second = h.start();
    second.wait_idle().await;

    assert!(h.queue.is_empty());
    assert_eq!(h.handler.calls_for("a"), 1);
    second.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_is_redelivered_and_succeeds() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    h.handler.script("a", vec![Behavior::Retryable]);

    let mut worker = h.start();
    worker.wait_idle().await;
    assert!(h.queue.contains("a"));
    assert_eq!(h.dedup_log.record_count(), 0);

    h.queue.expire_leases();
    eventually(|| h.queue.is_empty()).await;

    assert_eq!(
        h.handler.calls(),
        vec![("a".to_string(), 1), ("a".to_string(), 2)]
    );
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_message_failing_past_threshold_is_dead_lettered() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("p", r#"{"job":"poison"}"#);
    h.queue.send_with_id("ok", "{}");
    // Five earlier deliveries; the next one is the sixth.
    h.queue.set_dequeue_count("p", 5);
    h.queue.set_dequeue_count("ok", 4);

    let mut worker = h.start();
    worker.wait_idle().await;

    assert!(h.queue.is_empty());
    assert_eq!(h.handler.calls(), vec![("ok".to_string(), 5)]);
    assert_eq!(h.dead_letters.count(OPERATION), 1);

    let entries = h.dead_letters.list(OPERATION, 10).await.unwrap();
    assert_eq!(entries[0].message_id, "p");
    assert_eq!(entries[0].dequeue_count, 6);
    assert_eq!(entries[0].body, r#"{"job":"poison"}"#);
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_stays_until_poison_threshold() {
    init_test_logging();
    let h = Harness::with_config(WorkerConfig {
        poison_threshold: 2,
        ..test_config()
    });
    h.queue.send_with_id("bad", "{}");
    h.handler
        .script("bad", vec![Behavior::Fatal, Behavior::Fatal, Behavior::Fatal]);

    let mut worker = h.start();
    worker.wait_idle().await;
    assert!(h.queue.contains("bad"));

    h.queue.expire_leases();
    eventually(|| h.handler.calls_for("bad") == 2).await;
    h.queue.expire_leases();
    eventually(|| h.queue.is_empty()).await;

    assert_eq!(h.handler.calls_for("bad"), 2);
    assert_eq!(h.dead_letters.count(OPERATION), 1);
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_batch_handles_every_message_once() {
    init_test_logging();
    let h = Harness::with_config(WorkerConfig {
        concurrency: 4,
        ..test_config()
    });
    for i in 0..8 {
        h.queue.send_with_id(format!("m-{i}"), "{}");
    }

    let mut worker = h.start();
    worker.wait_idle().await;

    assert!(h.queue.is_empty());
    let mut ids: Vec<String> = h.handler.calls().into_iter().map(|(id, _)| id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(h.handler.calls().len(), 8);
    worker.stop().await;
}

#[tokio::test]
async fn test_lease_follows_recorded_durations() {
    init_test_logging();
    let h = Harness::new();
    let now = Utc::now();
    for secs in [40, 41, 39, 40, 42, 38, 40, 40, 41, 40, 39, 40] {
        h.samples
            .record(&ProcessingDurationSample::new(
                OPERATION,
                Duration::from_secs(secs),
                ProcessingOutcome::Succeeded,
                now,
            ))
            .await
            .unwrap();
    }

    let consumer = LeaseManagedConsumer::new(
        h.queue.clone(),
        LeaseTimeoutCalculator::new(LeaseTimeoutPolicy::default()),
        h.samples.clone(),
    );
    let lease = consumer.lease_for(OPERATION).await;
    assert_eq!(lease.source, LeaseSource::Percentile);
    // p95 = 42s, 42 * 1.75 = 73.5s
    assert_eq!(lease.timeout_seconds(), 74);

    let unseen = consumer.lease_for("thumbnail").await;
    assert_eq!(unseen.source, LeaseSource::Fallback);
    assert_eq!(unseen.timeout_seconds(), 300);
}
