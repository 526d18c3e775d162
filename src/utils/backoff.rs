use std::time::Duration;

use crate::constants::{CLAIM_ERROR_BASE_BACKOFF_SECS, CLAIM_ERROR_MAX_BACKOFF_SECS};

/// `base * 2^(step - 1)` capped at `max`. Step 0 is treated as step 1.
pub fn exponential_backoff(base: Duration, max: Duration, step: u32) -> Duration {
    let exponent = step.saturating_sub(1).min(31);
    base.checked_mul(2_u32.saturating_pow(exponent))
        .unwrap_or(max)
        .min(max)
}

/// Computes exponential backoff for consecutive claim errors.
///
/// Returns: 5, 10, 20, 40, 80, 160, 300, 300, ... seconds
pub fn claim_error_backoff(consecutive_errors: u32) -> Duration {
    exponential_backoff(
        Duration::from_secs(CLAIM_ERROR_BASE_BACKOFF_SECS),
        Duration::from_secs(CLAIM_ERROR_MAX_BACKOFF_SECS),
        consecutive_errors,
    )
}
