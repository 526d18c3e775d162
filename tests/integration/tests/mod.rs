//! Integration test modules

mod deletion;
mod polling;
mod processing;
