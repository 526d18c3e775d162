//! Lease utilization tracking.
//!
//! Utilization is `duration / lease`. A well sized lease sits around 40-60%.
//! Repeated observations above [`LEASE_UTILIZATION_ALERT_RATIO`] mean runs are
//! getting close to lease expiry, which is when duplicate deliveries start.

use dashmap::DashMap;
use std::time::Duration;

use crate::constants::{LEASE_UTILIZATION_ALERT_RATIO, LEASE_UTILIZATION_ALERT_STREAK};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationVerdict {
    pub ratio: f64,
    /// Consecutive observations above the alert ratio, including this one.
    pub streak: u32,
    pub saturated: bool,
}

#[derive(Debug)]
pub struct UtilizationMonitor {
    alert_ratio: f64,
    alert_streak: u32,
    streaks: DashMap<String, u32>,
}

impl Default for UtilizationMonitor {
    fn default() -> Self {
        Self::new(LEASE_UTILIZATION_ALERT_RATIO, LEASE_UTILIZATION_ALERT_STREAK)
    }
}

impl UtilizationMonitor {
    pub fn new(alert_ratio: f64, alert_streak: u32) -> Self {
        Self {
            alert_ratio,
            alert_streak: alert_streak.max(1),
            streaks: DashMap::new(),
        }
    }

    pub fn observe(
        &self,
        operation_type: &str,
        duration: Duration,
        lease: Duration,
    ) -> UtilizationVerdict {
        let ratio = if lease.is_zero() {
            f64::INFINITY
        } else {
            duration.as_secs_f64() / lease.as_secs_f64()
        };

        let mut streak = self.streaks.entry(operation_type.to_string()).or_insert(0);
        if ratio > self.alert_ratio {
            *streak = streak.saturating_add(1);
        } else {
            *streak = 0;
        }

        UtilizationVerdict {
            ratio,
            streak: *streak,
            saturated: *streak >= self.alert_streak,
        }
    }
}
