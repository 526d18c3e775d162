//! Worker configuration loaded from the environment.
//!
//! Every key has a default; unparsable values fall back to it with a warning.
//! [`WorkerConfig::validate`] rejects combinations the worker cannot run with
//! and returns non-fatal warnings for the caller to log.

use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::constants::*;
use crate::deletion::DeletionPolicy;
use crate::lease::{LeaseTimeoutCalculator, LeaseTimeoutPolicy};
use crate::repositories::SampleWindow;
use crate::scheduler::{ProcessorConfig, SchedulerConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    // === Queue ===
    pub queue_url: String,
    pub operation_type: String,
    /// Messages requested per claim (1-10)
    pub max_messages: usize,
    /// Concurrent handler invocations (1-4)
    pub concurrency: usize,
    pub poison_threshold: u32,

    // === Redis ===
    pub redis_url: String,
    pub redis_key_prefix: String,

    // === Polling ===
    pub idle_base_backoff_secs: u64,
    pub idle_max_backoff_secs: u64,
    pub idle_termination_threshold_secs: u64,

    // === Deduplication ===
    pub dedup_ttl_secs: u64,
    pub dedup_cache_capacity: usize,

    // === Lease sizing ===
    pub lease_safety_factor: f64,
    pub lease_min_timeout_secs: u64,
    pub lease_max_timeout_secs: u64,
    pub lease_default_timeout_secs: u64,
    pub lease_min_samples: usize,
    pub lease_safety_margin_secs: u64,
    /// Band overrides for `operation_type` (`LEASE_MIN_TIMEOUT_SECS_<OP>` / `LEASE_MAX_TIMEOUT_SECS_<OP>`)
    pub operation_lease_min_timeout_secs: Option<u64>,
    pub operation_lease_max_timeout_secs: Option<u64>,
    pub sample_window_size: usize,
    pub sample_max_age_hours: u64,

    // === Deletion ===
    pub delete_max_attempts: u32,
    pub delete_verify: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            operation_type: "default".to_string(),
            max_messages: WORKER_DEFAULT_MAX_MESSAGES,
            concurrency: WORKER_DEFAULT_CONCURRENCY,
            poison_threshold: DEFAULT_POISON_MESSAGE_THRESHOLD,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
            idle_base_backoff_secs: DEFAULT_IDLE_BASE_BACKOFF_SECS,
            idle_max_backoff_secs: DEFAULT_IDLE_MAX_BACKOFF_SECS,
            idle_termination_threshold_secs: DEFAULT_IDLE_TERMINATION_THRESHOLD_SECS,
            dedup_ttl_secs: DEFAULT_DEDUP_TTL_SECS,
            dedup_cache_capacity: DEFAULT_DEDUP_CACHE_CAPACITY,
            lease_safety_factor: DEFAULT_LEASE_SAFETY_FACTOR,
            lease_min_timeout_secs: DEFAULT_LEASE_MIN_TIMEOUT_SECS,
            lease_max_timeout_secs: DEFAULT_LEASE_MAX_TIMEOUT_SECS,
            lease_default_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            lease_min_samples: DEFAULT_LEASE_MIN_SAMPLES,
            lease_safety_margin_secs: DEFAULT_LEASE_SAFETY_MARGIN_SECS,
            operation_lease_min_timeout_secs: None,
            operation_lease_max_timeout_secs: None,
            sample_window_size: DEFAULT_SAMPLE_WINDOW_SIZE,
            sample_max_age_hours: DEFAULT_SAMPLE_MAX_AGE_HOURS,
            delete_max_attempts: DEFAULT_DELETE_MAX_ATTEMPTS,
            delete_verify: true,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let operation_type =
            env::var("OPERATION_TYPE").unwrap_or_else(|_| defaults.operation_type.clone());
        let suffix = operation_env_suffix(&operation_type);

        let max_messages = env_parse("WORKER_MAX_MESSAGES", defaults.max_messages);
        let concurrency = env_parse("WORKER_CONCURRENCY", defaults.concurrency);

        Self {
            queue_url: env::var("QUEUE_URL").unwrap_or_default(),
            max_messages: clamp_with_warning(
                "WORKER_MAX_MESSAGES",
                max_messages,
                0,
                WORKER_MAX_MESSAGES_LIMIT,
            ),
            concurrency: clamp_with_warning(
                "WORKER_CONCURRENCY",
                concurrency,
                1,
                WORKER_MAX_CONCURRENCY,
            ),
            poison_threshold: env_parse("POISON_MESSAGE_THRESHOLD", defaults.poison_threshold),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.redis_key_prefix),
            idle_base_backoff_secs: env_parse(
                "IDLE_BASE_BACKOFF_SECS",
                defaults.idle_base_backoff_secs,
            ),
            idle_max_backoff_secs: env_parse(
                "IDLE_MAX_BACKOFF_SECS",
                defaults.idle_max_backoff_secs,
            ),
            idle_termination_threshold_secs: env_parse(
                "IDLE_TERMINATION_THRESHOLD_SECS",
                defaults.idle_termination_threshold_secs,
            ),
            dedup_ttl_secs: env_parse("DEDUP_TTL_SECS", defaults.dedup_ttl_secs),
            dedup_cache_capacity: env_parse(
                "DEDUP_CACHE_CAPACITY",
                defaults.dedup_cache_capacity,
            ),
            lease_safety_factor: env_parse("LEASE_SAFETY_FACTOR", defaults.lease_safety_factor),
            lease_min_timeout_secs: env_parse(
                "LEASE_MIN_TIMEOUT_SECS",
                defaults.lease_min_timeout_secs,
            ),
            lease_max_timeout_secs: env_parse(
                "LEASE_MAX_TIMEOUT_SECS",
                defaults.lease_max_timeout_secs,
            ),
            lease_default_timeout_secs: env_parse(
                "LEASE_DEFAULT_TIMEOUT_SECS",
                defaults.lease_default_timeout_secs,
            ),
            lease_min_samples: env_parse("LEASE_MIN_SAMPLES", defaults.lease_min_samples),
            lease_safety_margin_secs: env_parse(
                "LEASE_SAFETY_MARGIN_SECS",
                defaults.lease_safety_margin_secs,
            ),
            operation_lease_min_timeout_secs: env_parse_optional(&format!(
                "LEASE_MIN_TIMEOUT_SECS_{suffix}"
            )),
            operation_lease_max_timeout_secs: env_parse_optional(&format!(
                "LEASE_MAX_TIMEOUT_SECS_{suffix}"
            )),
            sample_window_size: env_parse("SAMPLE_WINDOW_SIZE", defaults.sample_window_size),
            sample_max_age_hours: env_parse(
                "SAMPLE_MAX_AGE_HOURS",
                defaults.sample_max_age_hours,
            ),
            delete_max_attempts: env_parse("DELETE_MAX_ATTEMPTS", defaults.delete_max_attempts),
            delete_verify: env_parse("DELETE_VERIFY", defaults.delete_verify),
            operation_type,
        }
    }

    /// Checks the configuration. Returns warnings that do not prevent startup.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.queue_url.trim().is_empty() {
            return Err(ConfigError::MissingField("QUEUE_URL".into()));
        }
        if self.operation_type.trim().is_empty() {
            return Err(ConfigError::MissingField("OPERATION_TYPE".into()));
        }
        if self.max_messages == 0 {
            return Err(invalid("WORKER_MAX_MESSAGES", "must be at least 1"));
        }
        if !(MIN_LEASE_SAFETY_FACTOR..=MAX_LEASE_SAFETY_FACTOR).contains(&self.lease_safety_factor)
        {
            return Err(invalid(
                "LEASE_SAFETY_FACTOR",
                format!(
                    "{} is outside {MIN_LEASE_SAFETY_FACTOR}..={MAX_LEASE_SAFETY_FACTOR}",
                    self.lease_safety_factor
                ),
            ));
        }
        if self.idle_base_backoff_secs == 0 {
            return Err(invalid("IDLE_BASE_BACKOFF_SECS", "must be at least 1"));
        }
        if self.idle_base_backoff_secs > self.idle_max_backoff_secs {
            return Err(invalid(
                "IDLE_MAX_BACKOFF_SECS",
                "must not be lower than IDLE_BASE_BACKOFF_SECS",
            ));
        }
        if self.delete_max_attempts == 0 {
            return Err(invalid("DELETE_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.dedup_ttl_secs == 0 {
            return Err(invalid("DEDUP_TTL_SECS", "must be at least 1"));
        }

        let policy = self.operation_lease_policy();
        if policy.min_timeout > policy.max_timeout {
            return Err(invalid(
                "LEASE_MIN_TIMEOUT_SECS",
                format!(
                    "{}s exceeds LEASE_MAX_TIMEOUT_SECS {}s",
                    policy.min_timeout.as_secs(),
                    policy.max_timeout.as_secs()
                ),
            ));
        }
        if policy.max_timeout.as_secs() > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(invalid(
                "LEASE_MAX_TIMEOUT_SECS",
                format!("exceeds the queue limit of {MAX_VISIBILITY_TIMEOUT_SECS}s"),
            ));
        }

        let mut warnings = Vec::new();
        let ceiling = policy.max_timeout.max(self.lease_policy().max_timeout);
        if self.dedup_ttl() <= ceiling {
            warnings.push(format!(
                "DEDUP_TTL_SECS ({}) is not greater than the lease ceiling ({}s); a late redelivery can outlive its dedup record",
                self.dedup_ttl_secs,
                ceiling.as_secs()
            ));
        }
        if self.lease_safety_margin() >= policy.min_timeout {
            warnings.push(format!(
                "LEASE_SAFETY_MARGIN_SECS ({}) is not below the lease floor ({}s); short leases will skip every message",
                self.lease_safety_margin_secs,
                policy.min_timeout.as_secs()
            ));
        }
        Ok(warnings)
    }

    /// Log the effective configuration for debugging
    pub fn log_config(&self) {
        info!(
            operation_type = %self.operation_type,
            max_messages = self.max_messages,
            concurrency = self.concurrency,
            poison_threshold = self.poison_threshold,
            dedup_ttl_secs = self.dedup_ttl_secs,
            lease_min_timeout_secs = self.lease_min_timeout_secs,
            lease_max_timeout_secs = self.lease_max_timeout_secs,
            lease_safety_factor = self.lease_safety_factor,
            idle_max_backoff_secs = self.idle_max_backoff_secs,
            "Worker configuration loaded"
        );
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn lease_safety_margin(&self) -> Duration {
        Duration::from_secs(self.lease_safety_margin_secs)
    }

    pub fn idle_termination_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_termination_threshold_secs)
    }

    pub fn lease_policy(&self) -> LeaseTimeoutPolicy {
        LeaseTimeoutPolicy {
            min_timeout: Duration::from_secs(self.lease_min_timeout_secs),
            max_timeout: Duration::from_secs(self.lease_max_timeout_secs),
            safety_factor: self.lease_safety_factor,
            min_samples: self.lease_min_samples,
            default_timeout: Duration::from_secs(self.lease_default_timeout_secs),
        }
    }

    /// Lease policy for `operation_type`, with its band overrides applied.
    pub fn operation_lease_policy(&self) -> LeaseTimeoutPolicy {
        let mut policy = self.lease_policy();
        if let Some(min) = self.operation_lease_min_timeout_secs {
            policy.min_timeout = Duration::from_secs(min);
        }
        if let Some(max) = self.operation_lease_max_timeout_secs {
            policy.max_timeout = Duration::from_secs(max);
        }
        policy
    }

    pub fn lease_calculator(&self) -> LeaseTimeoutCalculator {
        let calculator = LeaseTimeoutCalculator::new(self.lease_policy());
        if self.operation_lease_min_timeout_secs.is_some()
            || self.operation_lease_max_timeout_secs.is_some()
        {
            calculator.with_policy(self.operation_type.clone(), self.operation_lease_policy())
        } else {
            calculator
        }
    }

    pub fn sample_window(&self) -> SampleWindow {
        SampleWindow {
            max_samples: self.sample_window_size.max(1),
            max_age: Duration::from_secs(self.sample_max_age_hours.saturating_mul(3600)),
        }
    }

    pub fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy {
            max_attempts: self.delete_max_attempts,
            verify: self.delete_verify,
            ..DeletionPolicy::default()
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            poison_threshold: self.poison_threshold,
            lease_safety_margin: self.lease_safety_margin(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_messages: self.max_messages,
            concurrency: self.concurrency,
            idle_base_backoff: Duration::from_secs(self.idle_base_backoff_secs),
            idle_max_backoff: Duration::from_secs(self.idle_max_backoff_secs),
            ..SchedulerConfig::new(self.operation_type.clone())
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// `ai-call` -> `AI_CALL`
fn operation_env_suffix(operation_type: &str) -> String {
    operation_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Parse an environment variable or return default
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(variable = %name, value = %value, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_parse_optional<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!(variable = %name, value = %value, "invalid value, ignoring");
    }
    parsed
}

fn clamp_with_warning(name: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(variable = %name, value = value, clamped = clamped, "value out of range, clamped");
    }
    clamped
}
