//! Worker wiring.
//!
//! - `initialize_worker`: builds a scheduler backed by SQS and Redis
//! - `WorkerStores` / `build_scheduler`: assemble the pieces around any queue
//!   service, used directly by tests and single-process deployments
mod initialize_worker;
pub use initialize_worker::*;
