// Number of messages requested per claim (SQS caps a receive at 10)
pub const WORKER_DEFAULT_MAX_MESSAGES: usize = 10;
pub const WORKER_MAX_MESSAGES_LIMIT: usize = 10;

// Concurrent handler invocations per worker
pub const WORKER_DEFAULT_CONCURRENCY: usize = 1;
pub const WORKER_MAX_CONCURRENCY: usize = 4;

/// Deliveries after which a message is dead-lettered instead of handled.
pub const DEFAULT_POISON_MESSAGE_THRESHOLD: u32 = 5;

// Idle backoff: 2s, 4s, 8s, ... capped at 30s
pub const DEFAULT_IDLE_BASE_BACKOFF_SECS: u64 = 2;
pub const DEFAULT_IDLE_MAX_BACKOFF_SECS: u64 = 30;

/// Idle time after which the worker reports it is safe to scale in (5 minutes).
pub const DEFAULT_IDLE_TERMINATION_THRESHOLD_SECS: u64 = 300;

// Claim error backoff: 5s, 10s, 20s, ... capped at 5 minutes
pub const CLAIM_ERROR_BASE_BACKOFF_SECS: u64 = 5;
pub const CLAIM_ERROR_MAX_BACKOFF_SECS: u64 = 300;

/// Consecutive retryable claim failures before health is reported as degraded.
pub const CLAIM_ERRORS_BEFORE_DEGRADED: u32 = 3;

// Deletion retries: 3 attempts, uniform jitter between 250ms and 750ms
pub const DEFAULT_DELETE_MAX_ATTEMPTS: u32 = 3;
pub const DELETE_RETRY_MIN_DELAY_MS: u64 = 250;
pub const DELETE_RETRY_MAX_DELAY_MS: u64 = 750;

/// Time allowed for in-flight handlers to finish once shutdown is requested.
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 30;
