//! In-memory worker harness.
//!
//! Wires a [`PollingScheduler`] to an [`InMemoryQueueService`] and in-memory
//! stores while keeping typed handles to each of them for assertions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lease_queue_worker::bootstrap::{build_scheduler, WorkerStores};
use lease_queue_worker::config::WorkerConfig;
use lease_queue_worker::models::LeasedMessage;
use lease_queue_worker::queues::InMemoryQueueService;
use lease_queue_worker::repositories::{
    InMemoryDeadLetterLog, InMemoryDedupLog, InMemoryDurationSampleStore,
};
use lease_queue_worker::scheduler::{
    HandlerError, MessageHandler, PollingScheduler, PollingState, SchedulerState, WorkerStatus,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const OPERATION: &str = "render";

/// What the handler does on a given delivery of a message.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Retryable,
    Fatal,
}

/// Handler that records every invocation and follows a per-message script.
///
/// Deliveries beyond the script succeed.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    scripts: Mutex<HashMap<String, Vec<Behavior>>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, message_id: &str, behaviors: Vec<Behavior>) {
        self.scripts.lock().insert(message_id.to_string(), behaviors);
    }

    /// `(message_id, dequeue_count)` per invocation, in call order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, message_id: &str) -> usize {
        self.calls.lock().iter().filter(|(id, _)| id == message_id).count()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: &LeasedMessage) -> Result<(), HandlerError> {
        let attempt = {
            let mut calls = self.calls.lock();
            calls.push((message.id().to_string(), message.dequeue_count()));
            calls.iter().filter(|(id, _)| id == message.id()).count()
        };
        let behavior = self
            .scripts
            .lock()
            .get(message.id())
            .and_then(|script| script.get(attempt - 1).cloned())
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Retryable => Err(HandlerError::Retryable("downstream timeout".into())),
            Behavior::Fatal => Err(HandlerError::Fatal("invalid payload".into())),
        }
    }
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        queue_url: "memory://render".to_string(),
        operation_type: OPERATION.to_string(),
        ..WorkerConfig::default()
    }
}

pub struct Harness {
    pub config: WorkerConfig,
    pub queue: Arc<InMemoryQueueService>,
    pub handler: Arc<ScriptedHandler>,
    pub dedup_log: Arc<InMemoryDedupLog>,
    pub samples: Arc<InMemoryDurationSampleStore>,
    pub dead_letters: Arc<InMemoryDeadLetterLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: WorkerConfig) -> Self {
        Self {
            queue: Arc::new(InMemoryQueueService::new()),
            handler: Arc::new(ScriptedHandler::new()),
            dedup_log: Arc::new(InMemoryDedupLog::new(config.dedup_ttl())),
            samples: Arc::new(InMemoryDurationSampleStore::new(config.sample_window())),
            dead_letters: Arc::new(InMemoryDeadLetterLog::new()),
            config,
        }
    }

    pub fn stores(&self) -> WorkerStores {
        WorkerStores {
            dedup_log: self.dedup_log.clone(),
            samples: self.samples.clone(),
            dead_letters: self.dead_letters.clone(),
        }
    }

    /// A fresh scheduler over the shared queue and stores, as after a process restart.
    pub fn scheduler(&self) -> PollingScheduler {
        build_scheduler(
            &self.config,
            self.queue.clone(),
            self.stores(),
            self.handler.clone(),
        )
    }

    pub fn start(&self) -> RunningWorker {
        let scheduler = self.scheduler();
        let status = scheduler.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        RunningWorker {
            status,
            shutdown_tx,
            handle: scheduler.spawn(shutdown_rx),
        }
    }
}

pub struct RunningWorker {
    pub status: watch::Receiver<WorkerStatus>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<PollingState>,
}

impl RunningWorker {
    /// Waits until the worker has drained the queue and gone idle.
    pub async fn wait_idle(&mut self) -> WorkerStatus {
        self.wait_for(|s| s.state == SchedulerState::IdleBackoff && s.in_flight == 0)
            .await
    }

    pub async fn wait_for(&mut self, predicate: impl FnMut(&WorkerStatus) -> bool) -> WorkerStatus {
        self.status
            .wait_for(predicate)
            .await
            .expect("worker status channel closed")
            .clone()
    }

    pub async fn stop(self) -> PollingState {
        self.shutdown_tx.send(true).expect("worker already stopped");
        self.handle.await.expect("worker task panicked")
    }
}

/// Polls `check` while letting (paused) time advance, failing after ten virtual minutes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..6_000 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("condition not met within ten minutes of virtual time");
}
