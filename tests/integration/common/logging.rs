//! Test logging initialization
//!
//! Uses `std::sync::Once` so initialization happens once per test binary.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for integration tests. Filtered by `RUST_LOG`, default `warn`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = dotenvy::from_filename(".env.integration");
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_target(false)
            .with_ansi(false)
            .try_init();
    });
}
