//! Default values and fixed limits shared across the worker core.
mod logging;
pub use logging::*;

mod worker;
pub use worker::*;

mod lease;
pub use lease::*;

mod dedup;
pub use dedup::*;
