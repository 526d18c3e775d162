//! Lease sizing: how long a claimed message stays invisible to other consumers.
mod calculator;
pub use calculator::*;

mod utilization;
pub use utilization::*;
