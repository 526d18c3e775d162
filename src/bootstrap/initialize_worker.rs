use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use eyre::eyre;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::dedup::DeduplicationStore;
use crate::deletion::DeletionManager;
use crate::queues::{LeaseManagedConsumer, QueueService, SqsQueueService};
use crate::repositories::{
    DeadLetterLog, DedupLog, DurationSampleStore, InMemoryDeadLetterLog, InMemoryDedupLog,
    InMemoryDurationSampleStore, RedisDeadLetterLog, RedisDedupLog, RedisDurationSampleStore,
};
use crate::scheduler::{MessageHandler, MessageProcessor, PollingScheduler};

const REDIS_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// The durable stores a worker writes to.
#[derive(Clone)]
pub struct WorkerStores {
    pub dedup_log: Arc<dyn DedupLog>,
    pub samples: Arc<dyn DurationSampleStore>,
    pub dead_letters: Arc<dyn DeadLetterLog>,
}

impl std::fmt::Debug for WorkerStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStores").finish_non_exhaustive()
    }
}

impl WorkerStores {
    pub fn in_memory(config: &WorkerConfig) -> Self {
        Self {
            dedup_log: Arc::new(InMemoryDedupLog::new(config.dedup_ttl())),
            samples: Arc::new(InMemoryDurationSampleStore::new(config.sample_window())),
            dead_letters: Arc::new(InMemoryDeadLetterLog::new()),
        }
    }

    pub async fn redis(config: &WorkerConfig) -> Result<Self> {
        let connection_manager = Arc::new(create_connection_manager(&config.redis_url).await?);
        let prefix = config.redis_key_prefix.clone();

        Ok(Self {
            dedup_log: Arc::new(RedisDedupLog::new(
                connection_manager.clone(),
                prefix.clone(),
                config.dedup_ttl(),
            )?),
            samples: Arc::new(RedisDurationSampleStore::new(
                connection_manager.clone(),
                prefix.clone(),
                config.sample_window(),
            )?),
            dead_letters: Arc::new(RedisDeadLetterLog::new(connection_manager, prefix)?),
        })
    }
}

/// Auto-reconnecting Redis connection shared by all stores.
async fn create_connection_manager(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| eyre!("Invalid Redis URL: {}", e))?;
    let conn_config = ConnectionManagerConfig::new()
        .set_connection_timeout(REDIS_CONNECTION_TIMEOUT)
        .set_response_timeout(REDIS_CONNECTION_TIMEOUT)
        .set_number_of_retries(2)
        .set_max_delay(1000);

    ConnectionManager::new_with_config(client, conn_config)
        .await
        .map_err(|e| eyre!("Failed to create Redis connection manager: {}", e))
}

/// Assembles consumer, dedup store, deletion manager and processor around `queue`.
pub fn build_scheduler(
    config: &WorkerConfig,
    queue: Arc<dyn QueueService>,
    stores: WorkerStores,
    handler: Arc<dyn MessageHandler>,
) -> PollingScheduler {
    let consumer = LeaseManagedConsumer::new(
        queue.clone(),
        config.lease_calculator(),
        stores.samples.clone(),
    );
    let dedup = Arc::new(DeduplicationStore::new(
        stores.dedup_log,
        config.dedup_cache_capacity,
        config.dedup_ttl(),
    ));
    let deletion = Arc::new(DeletionManager::new(queue, config.deletion_policy()));
    let processor = MessageProcessor::new(
        config.processor_config(),
        handler,
        dedup,
        deletion,
        stores.samples,
        stores.dead_letters,
    );

    PollingScheduler::new(config.scheduler_config(), consumer, processor)
}

/// Builds a worker against SQS and Redis.
///
/// Returns the scheduler and the sender that stops it; pass
/// `shutdown_tx.subscribe()` to [`PollingScheduler::spawn`] or
/// [`PollingScheduler::run`].
pub async fn initialize_worker(
    config: &WorkerConfig,
    handler: Arc<dyn MessageHandler>,
) -> Result<(PollingScheduler, watch::Sender<bool>)> {
    let warnings = config.validate()?;
    for warning in &warnings {
        warn!(operation_type = %config.operation_type, "{}", warning);
    }
    config.log_config();

    let aws_config = aws_config::load_from_env().await;
    let sqs_client = aws_sdk_sqs::Client::new(&aws_config);
    let queue: Arc<dyn QueueService> =
        Arc::new(SqsQueueService::new(sqs_client, config.queue_url.clone()));

    let stores = WorkerStores::redis(config).await?;
    let scheduler = build_scheduler(config, queue, stores, handler);
    let (shutdown_tx, _) = watch::channel(false);

    info!(
        operation_type = %config.operation_type,
        queue_url = %config.queue_url,
        "Initialized queue worker"
    );
    Ok((scheduler, shutdown_tx))
}
