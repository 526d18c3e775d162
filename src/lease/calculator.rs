//! Lease timeout calculation.
//!
//! The lease handed to the queue on receive has to outlast slow runs without
//! leaving finished messages hidden for long. It is derived from recent
//! processing durations:
//!
//! `timeout = clamp(max(ceil(p95 * safety_factor), p99), min_timeout, max_timeout)`
//!
//! rounded up to whole seconds. Taking the p99 into account keeps the lease
//! at or above the slowest regular runs whenever the band allows it. With too
//! few samples a configured default (also clamped to the band) is used.

use std::collections::HashMap;
use std::time::Duration;

use crate::constants::{
    DEFAULT_LEASE_MAX_TIMEOUT_SECS, DEFAULT_LEASE_MIN_SAMPLES, DEFAULT_LEASE_MIN_TIMEOUT_SECS,
    DEFAULT_LEASE_SAFETY_FACTOR, DEFAULT_LEASE_TIMEOUT_SECS,
};
use crate::models::ProcessingDurationSample;

/// Tuning for one operation type.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseTimeoutPolicy {
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub safety_factor: f64,
    pub min_samples: usize,
    pub default_timeout: Duration,
}

impl Default for LeaseTimeoutPolicy {
    fn default() -> Self {
        Self {
            min_timeout: Duration::from_secs(DEFAULT_LEASE_MIN_TIMEOUT_SECS),
            max_timeout: Duration::from_secs(DEFAULT_LEASE_MAX_TIMEOUT_SECS),
            safety_factor: DEFAULT_LEASE_SAFETY_FACTOR,
            min_samples: DEFAULT_LEASE_MIN_SAMPLES,
            default_timeout: Duration::from_secs(DEFAULT_LEASE_TIMEOUT_SECS),
        }
    }
}

impl LeaseTimeoutPolicy {
    fn clamp_secs(&self, secs: u64) -> u64 {
        let floor = self.min_timeout.as_secs().max(1);
        let ceiling = self.max_timeout.as_secs().max(floor);
        secs.clamp(floor, ceiling)
    }
}

/// Where a lease value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSource {
    Percentile,
    /// Not enough samples; the policy default was used.
    Fallback,
}

/// Computed lease for an operation type. Derived on every claim, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseTimeout {
    pub operation_type: String,
    pub timeout: Duration,
    pub source: LeaseSource,
    pub sample_count: usize,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    /// The p99 duration is above the band ceiling, so leases can expire mid-run.
    pub p99_exceeds_ceiling: bool,
}

impl LeaseTimeout {
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout.as_secs()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeaseTimeoutCalculator {
    default_policy: LeaseTimeoutPolicy,
    overrides: HashMap<String, LeaseTimeoutPolicy>,
}

impl LeaseTimeoutCalculator {
    pub fn new(default_policy: LeaseTimeoutPolicy) -> Self {
        Self {
            default_policy,
            overrides: HashMap::new(),
        }
    }

    pub fn with_policy(
        mut self,
        operation_type: impl Into<String>,
        policy: LeaseTimeoutPolicy,
    ) -> Self {
        self.overrides.insert(operation_type.into(), policy);
        self
    }

    pub fn policy_for(&self, operation_type: &str) -> &LeaseTimeoutPolicy {
        self.overrides
            .get(operation_type)
            .unwrap_or(&self.default_policy)
    }

    /// Computes the lease for `operation_type` from a recent sample window.
    ///
    /// Samples recorded for other operation types are ignored.
    pub fn compute_timeout(
        &self,
        operation_type: &str,
        samples: &[ProcessingDurationSample],
    ) -> LeaseTimeout {
        let policy = self.policy_for(operation_type);
        let mut durations: Vec<u64> = samples
            .iter()
            .filter(|s| s.operation_type == operation_type)
            .map(|s| s.duration_ms)
            .collect();
        durations.sort_unstable();

        let sample_count = durations.len();
        if sample_count < policy.min_samples.max(1) {
            let secs = policy.clamp_secs(ceil_secs(policy.default_timeout.as_millis() as f64));
            return LeaseTimeout {
                operation_type: operation_type.to_string(),
                timeout: Duration::from_secs(secs),
                source: LeaseSource::Fallback,
                sample_count,
                p95_ms: None,
                p99_ms: None,
                p99_exceeds_ceiling: false,
            };
        }

        // Both exist: durations is non-empty here.
        let p95 = percentile(&durations, 95.0).unwrap_or_default();
        let p99 = percentile(&durations, 99.0).unwrap_or_default();

        let scaled_ms = (p95 as f64 * policy.safety_factor).max(p99 as f64);
        let secs = policy.clamp_secs(ceil_secs(scaled_ms));

        LeaseTimeout {
            operation_type: operation_type.to_string(),
            timeout: Duration::from_secs(secs),
            source: LeaseSource::Percentile,
            sample_count,
            p95_ms: Some(p95),
            p99_ms: Some(p99),
            p99_exceeds_ceiling: u128::from(p99) > policy.max_timeout.as_millis(),
        }
    }
}

fn ceil_secs(millis: f64) -> u64 {
    (millis / 1000.0).ceil().max(0.0) as u64
}

/// Nearest-rank percentile of an ascending slice.
pub fn percentile(sorted: &[u64], pct: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingOutcome;
    use chrono::Utc;
    use proptest::prelude::*;

    fn samples(operation_type: &str, durations_ms: &[u64]) -> Vec<ProcessingDurationSample> {
        durations_ms
            .iter()
            .map(|ms| {
                ProcessingDurationSample::new(
                    operation_type,
                    Duration::from_millis(*ms),
                    ProcessingOutcome::Succeeded,
                    Utc::now(),
                )
            })
            .collect()
    }

    fn band(min_secs: u64, max_secs: u64, factor: f64, min_samples: usize) -> LeaseTimeoutPolicy {
        LeaseTimeoutPolicy {
            min_timeout: Duration::from_secs(min_secs),
            max_timeout: Duration::from_secs(max_secs),
            safety_factor: factor,
            min_samples,
            default_timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
        assert_eq!(percentile(&sorted, 50.0), Some(50));
        assert_eq!(percentile(&sorted, 95.0), Some(100));
        assert_eq!(percentile(&sorted, 0.0), Some(10));
        assert_eq!(percentile(&[], 95.0), None);
    }

    #[test]
    fn test_short_durations_clamped_to_floor() {
        let calculator = LeaseTimeoutCalculator::new(band(1, 60, 1.75, 5));
        let window = samples("X", &[40, 42, 45, 46, 50, 48, 44, 200]);

        let lease = calculator.compute_timeout("X", &window);
        assert_eq!(lease.source, LeaseSource::Percentile);
        assert_eq!(lease.timeout_seconds(), 1);
        assert_eq!(lease.sample_count, 8);
    }

    #[test]
    fn test_fallback_below_min_samples() {
        let calculator = LeaseTimeoutCalculator::new(band(30, 900, 1.75, 10));
        let lease = calculator.compute_timeout("render", &samples("render", &[1000; 9]));
        assert_eq!(lease.source, LeaseSource::Fallback);
        assert_eq!(lease.timeout, Duration::from_secs(300));
        assert_eq!(lease.p95_ms, None);
    }

    #[test]
    fn test_fallback_default_is_clamped() {
        let calculator = LeaseTimeoutCalculator::new(band(1, 60, 1.75, 10));
        let lease = calculator.compute_timeout("render", &[]);
        assert_eq!(lease.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_scaled_p95() {
        // p95 of 20 samples of 40s with one 60s outlier is 40s -> 70s
        let mut durations = vec![40_000; 19];
        durations.push(60_000);
        let calculator = LeaseTimeoutCalculator::new(band(30, 900, 1.75, 10));
        let lease = calculator.compute_timeout("render", &samples("render", &durations));

        assert_eq!(lease.p95_ms, Some(40_000));
        assert_eq!(lease.p99_ms, Some(60_000));
        assert_eq!(lease.timeout_seconds(), 70);
    }

    #[test]
    fn test_p99_widens_lease_over_scaled_p95() {
        // 100 samples: 95 at 10s, 5 at 100s; p95 = 10s -> 17.5s but p99 = 100s
        let mut durations = vec![10_000; 95];
        durations.extend([100_000; 5]);
        let calculator = LeaseTimeoutCalculator::new(band(1, 900, 1.75, 10));
        let lease = calculator.compute_timeout("render", &samples("render", &durations));

        assert_eq!(lease.timeout_seconds(), 100);
        assert!(!lease.p99_exceeds_ceiling);
    }

    #[test]
    fn test_ceiling_and_flag() {
        let calculator = LeaseTimeoutCalculator::new(band(30, 900, 2.0, 10));
        let lease = calculator.compute_timeout("render", &samples("render", &[2_000_000; 12]));
        assert_eq!(lease.timeout_seconds(), 900);
        assert!(lease.p99_exceeds_ceiling);
    }

    #[test]
    fn test_ignores_other_operation_types() {
        let calculator = LeaseTimeoutCalculator::new(band(1, 900, 1.5, 3));
        let mut window = samples("render", &[10_000; 5]);
        window.extend(samples("build", &[800_000; 5]));

        let lease = calculator.compute_timeout("render", &window);
        assert_eq!(lease.sample_count, 5);
        assert_eq!(lease.timeout_seconds(), 15);
    }

    #[test]
    fn test_per_operation_override() {
        let calculator = LeaseTimeoutCalculator::new(band(30, 900, 1.75, 10))
            .with_policy("ai_call", band(120, 1800, 1.5, 10));

        assert_eq!(
            calculator.compute_timeout("ai_call", &[]).timeout,
            Duration::from_secs(300)
        );
        assert_eq!(
            calculator.policy_for("ai_call").max_timeout,
            Duration::from_secs(1800)
        );
        assert_eq!(
            calculator.policy_for("other").max_timeout,
            Duration::from_secs(900)
        );
    }

    proptest! {
        #[test]
        fn prop_timeout_covers_p99_within_band(
            durations in prop::collection::vec(1u64..2_000_000u64, 10..200),
            factor in 1.5f64..2.0f64,
        ) {
            let policy = band(30, 900, factor, 10);
            let calculator = LeaseTimeoutCalculator::new(policy);
            let lease = calculator.compute_timeout("op", &samples("op", &durations));

            let mut sorted = durations.clone();
            sorted.sort_unstable();
            let p99 = percentile(&sorted, 99.0).unwrap();

            let timeout_ms = lease.timeout.as_millis() as u64;
            prop_assert!(lease.timeout_seconds() >= 30);
            prop_assert!(lease.timeout_seconds() <= 900);
            prop_assert!(timeout_ms >= p99.min(900_000));
        }
    }
}
