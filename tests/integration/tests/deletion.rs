//! Deletion retries and idempotency against the in-memory queue.

use std::sync::Arc;

use lease_queue_worker::deletion::{
    DeletionManager, DeletionOutcome, DeletionPolicy, Verification,
};
use lease_queue_worker::lease::{LeaseTimeoutCalculator, LeaseTimeoutPolicy};
use lease_queue_worker::models::LeasedMessage;
use lease_queue_worker::queues::{InMemoryQueueService, LeaseManagedConsumer, QueueError};

use crate::integration::common::harness::{eventually, Harness, OPERATION};
use crate::integration::common::logging::init_test_logging;

async fn claim_one(h: &Harness) -> LeasedMessage {
    let consumer = LeaseManagedConsumer::new(
        h.queue.clone(),
        LeaseTimeoutCalculator::new(LeaseTimeoutPolicy::default()),
        h.samples.clone(),
    );
    consumer
        .claim_batch(1, OPERATION)
        .await
        .unwrap()
        .pop()
        .expect("one message")
        .expect("well-formed envelope")
}

fn manager(queue: Arc<InMemoryQueueService>) -> DeletionManager {
    DeletionManager::new(queue, DeletionPolicy::default())
}

#[tokio::test(start_paused = true)]
async fn test_worker_retries_transient_delete_failures() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    h.queue
        .fail_next_delete(QueueError::Unavailable("503".into()));
    h.queue
        .fail_next_delete(QueueError::Throttled("slow down".into()));

    let worker = h.start();
    eventually(|| h.queue.is_empty()).await;

    assert_eq!(h.queue.delete_calls(), 3);
    assert_eq!(h.handler.calls_for("a"), 1);
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_delete_is_already_gone() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    let message = claim_one(&h).await;
    let deletion = manager(h.queue.clone());

    let first = deletion.delete_with_confirmation(&message).await;
    assert_eq!(
        first.outcome,
        DeletionOutcome::Deleted {
            already_gone: false,
            verification: Verification::Confirmed,
        }
    );

    let second = deletion.delete_with_confirmation(&message).await;
    assert!(second.is_deleted());
    assert!(matches!(
        second.outcome,
        DeletionOutcome::Deleted {
            already_gone: true,
            ..
        }
    ));
    assert_eq!(second.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_receipt_after_redelivery_does_not_delete() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    let stale = claim_one(&h).await;
    h.queue.expire_leases();
    let current = claim_one(&h).await;
    let deletion = manager(h.queue.clone());

    // The earlier delivery's handle no longer names the message.
    let report = deletion.delete_with_confirmation(&stale).await;
    assert!(matches!(
        report.outcome,
        DeletionOutcome::Deleted {
            already_gone: true,
            verification: Verification::StillPresent,
        }
    ));
    assert!(h.queue.contains("a"));

    deletion.delete_with_confirmation(&current).await;
    assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_leave_message_for_redelivery() {
    init_test_logging();
    let h = Harness::new();
    h.queue.send_with_id("a", "{}");
    for _ in 0..3 {
        h.queue
            .fail_next_delete(QueueError::Unavailable("503".into()));
    }
    let message = claim_one(&h).await;

    let report = manager(h.queue.clone())
        .delete_with_confirmation(&message)
        .await;
    assert!(!report.is_deleted());
    assert_eq!(report.attempts, 3);
    assert!(h.queue.contains("a"));
}
