mod backoff;
pub use backoff::*;
