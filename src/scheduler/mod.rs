//! Polling scheduler.
//!
//! Drives the claim, dedup, handle, commit, delete cycle for one operation
//! type and publishes a [`WorkerStatus`] the host can use to decide whether
//! the instance is idle enough to be scaled in.

mod handler;
pub use handler::*;

mod processor;
pub use processor::*;

mod state;
pub use state::*;

mod worker;
pub use worker::*;
