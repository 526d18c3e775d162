//! Lease (visibility timeout) calculation defaults.

/// Multiplier applied to the p95 processing duration.
pub const DEFAULT_LEASE_SAFETY_FACTOR: f64 = 1.75;

/// Accepted range for the safety factor.
pub const MIN_LEASE_SAFETY_FACTOR: f64 = 1.0;
pub const MAX_LEASE_SAFETY_FACTOR: f64 = 3.0;

/// Lower bound of the lease band.
pub const DEFAULT_LEASE_MIN_TIMEOUT_SECS: u64 = 30;

/// Upper bound of the lease band (15 minutes).
pub const DEFAULT_LEASE_MAX_TIMEOUT_SECS: u64 = 900;

/// Lease used until enough samples exist for an operation type.
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;

/// Samples required before percentiles are trusted.
pub const DEFAULT_LEASE_MIN_SAMPLES: usize = 10;

/// Remaining lease below which a message is not handed to the handler.
pub const DEFAULT_LEASE_SAFETY_MARGIN_SECS: u64 = 5;

/// SQS hard limit on visibility timeout (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

/// Utilization above which a lease is considered too tight.
pub const LEASE_UTILIZATION_ALERT_RATIO: f64 = 0.85;

/// Consecutive tight observations before the lease is flagged as saturated.
pub const LEASE_UTILIZATION_ALERT_STREAK: u32 = 3;

// Rolling sample window: last 200 samples, at most 7 days old
pub const DEFAULT_SAMPLE_WINDOW_SIZE: usize = 200;
pub const DEFAULT_SAMPLE_MAX_AGE_HOURS: u64 = 7 * 24;
