//! Lease-managed queue consumption.
//!
//! Claims messages from an at-least-once queue with a visibility lease sized
//! from recent processing durations, filters redeliveries through a two-tier
//! deduplication store, deletes completed messages with retries and
//! verification, and backs off when the queue is idle so an autoscaler can
//! tell when an instance is safe to stop.
//!
//! A host binary typically does:
//!
//! ```rust,ignore
//! dotenvy::dotenv().ok();
//! lease_queue_worker::logging::setup_logging()?;
//! let config = WorkerConfig::from_env();
//! let (scheduler, shutdown_tx) = initialize_worker(&config, Arc::new(MyHandler)).await?;
//! let worker = scheduler.spawn(shutdown_tx.subscribe());
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod deletion;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod queues;
pub mod repositories;
pub mod scheduler;
pub mod utils;
