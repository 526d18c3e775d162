//! Common utilities and helpers for integration tests

pub mod harness;
pub mod logging;
