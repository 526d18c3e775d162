//! # Repository Module
//!
//! Durable state owned by the worker core: the deduplication log, the
//! processing-duration samples feeding lease sizing, and the dead-letter log.
//! Each store has an in-memory implementation for tests and single-process
//! runs and a Redis implementation shared by all worker instances.

pub mod dead_letter;
pub use dead_letter::*;

pub mod dedup_log;
pub use dedup_log::*;

pub mod duration_samples;
pub use duration_samples::*;

// Redis base utilities for shared functionality
pub mod redis_base;
