//! Two-tier deduplication store.
//!
//! Tier one is a bounded in-process cache, tier two the durable [`DedupLog`]
//! shared by every worker instance. A message id is checked before the handler
//! runs and committed only after the handler succeeded.
//!
//! Within one process, concurrent checks of the same id are serialized by a
//! [`Reservation`]: the first caller gets it, the others see
//! [`DedupCheck::InFlight`] until it is dropped.

mod cache;
pub use cache::RecordCache;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{DeduplicationRecord, RepositoryError};
use crate::repositories::DedupLog;

#[derive(Debug, Error)]
pub enum DedupError {
    /// The cache holds the record but the durable log does not.
    #[error("Failed to persist dedup record for {message_id}: {source}")]
    DurableWrite {
        message_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to prune dedup log: {0}")]
    Prune(#[source] RepositoryError),
}

/// Exclusive in-process claim on a message id, released on drop.
#[derive(Debug)]
pub struct Reservation {
    message_id: String,
    in_flight: Arc<DashSet<String>>,
}

impl Reservation {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_flight.remove(&self.message_id);
    }
}

/// Result of [`DeduplicationStore::check_and_reserve`].
#[derive(Debug)]
pub enum DedupCheck {
    /// Never processed; the caller owns the id until the reservation drops.
    Fresh(Reservation),
    /// Already processed; skip the handler and delete the message.
    Duplicate(DeduplicationRecord),
    /// The durable log could not be consulted. Treated as fresh, but flagged.
    Unknown {
        reason: String,
        reservation: Reservation,
    },
    /// Another task in this process currently holds the id.
    InFlight,
}

impl DedupCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Duplicate(_) => "duplicate",
            Self::Unknown { .. } => "unknown",
            Self::InFlight => "in_flight",
        }
    }
}

pub struct DeduplicationStore {
    cache: RecordCache,
    in_flight: Arc<DashSet<String>>,
    log: Arc<dyn DedupLog>,
    ttl: Duration,
}

impl std::fmt::Debug for DeduplicationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeduplicationStore")
            .field("cached", &self.cache.len())
            .field("in_flight", &self.in_flight.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DeduplicationStore {
    pub fn new(log: Arc<dyn DedupLog>, cache_capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: RecordCache::new(cache_capacity),
            in_flight: Arc::new(DashSet::new()),
            log,
            ttl,
        }
    }

    /// Default TTL for records committed by the scheduler.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub async fn check_and_reserve(&self, message_id: &str) -> DedupCheck {
        if !self.in_flight.insert(message_id.to_string()) {
            return DedupCheck::InFlight;
        }
        let reservation = Reservation {
            message_id: message_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        };

        let now = Utc::now();
        if let Some(record) = self.cache.get(message_id, now) {
            debug!(message_id = %message_id, tier = "cache", "dedup hit");
            return DedupCheck::Duplicate(record);
        }

        match self.log.lookup(message_id, now).await {
            Ok(Some(record)) => {
                debug!(message_id = %message_id, tier = "durable", "dedup hit");
                self.cache.insert(record.clone(), now);
                DedupCheck::Duplicate(record)
            }
            Ok(None) => DedupCheck::Fresh(reservation),
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "durable dedup lookup failed, assuming message is fresh"
                );
                DedupCheck::Unknown {
                    reason: e.to_string(),
                    reservation,
                }
            }
        }
    }

    /// Records a successful processing in both tiers.
    ///
    /// The cache is written first, so even when the durable write fails this
    /// process will not handle the message again. A `ttl` longer than the
    /// durable log's retention is shortened to it.
    pub async fn commit(
        &self,
        message_id: &str,
        operation_type: &str,
        ttl: Duration,
    ) -> Result<DeduplicationRecord, DedupError> {
        let retention = self.log.retention();
        let ttl = if ttl > retention {
            warn!(
                message_id = %message_id,
                requested_secs = ttl.as_secs(),
                retention_secs = retention.as_secs(),
                "dedup ttl exceeds durable log retention, clamping"
            );
            retention
        } else {
            ttl
        };
        let now = Utc::now();
        let record = DeduplicationRecord::new(message_id, operation_type, now, ttl);
        self.cache.insert(record.clone(), now);

        self.log
            .append(&record)
            .await
            .map_err(|source| DedupError::DurableWrite {
                message_id: message_id.to_string(),
                source,
            })?;
        Ok(record)
    }

    /// Drops durable partitions that ended before `cutoff` and expired cache entries.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DedupError> {
        let swept = self.cache.sweep_expired(Utc::now());
        let removed = self
            .log
            .prune_older_than(cutoff)
            .await
            .map_err(DedupError::Prune)?;
        debug!(cache_swept = swept, durable_removed = removed, "pruned dedup store");
        Ok(removed)
    }
}
