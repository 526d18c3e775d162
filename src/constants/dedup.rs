//! Deduplication store defaults.

/// Dedup record lifetime (1 hour), well above the 15 minute lease ceiling.
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 3600;

/// Entries kept in the in-process dedup cache.
pub const DEFAULT_DEDUP_CACHE_CAPACITY: usize = 10_000;

/// Default namespace for Redis keys.
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "queue_worker";

/// Dead-letter entries kept per operation type in Redis.
pub const DEAD_LETTER_MAX_ENTRIES: isize = 10_000;
