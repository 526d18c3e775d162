//! Metrics module for the queue worker.
//!
//! - This module contains the global Prometheus registry.
//! - Defines the worker metrics, all labelled by `operation_type`.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    // Global Prometheus registry.
    pub static ref REGISTRY: Registry = Registry::new();

    // Histogram: handler wall time per message.
    pub static ref PROCESSING_DURATION: HistogramVec = {
      let histogram_opts = HistogramOpts::new(
          "queue_worker_processing_duration_seconds",
          "Message handler duration in seconds",
      )
      .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]);
      let histogram_vec = HistogramVec::new(histogram_opts, &["operation_type", "outcome"]).unwrap();
      REGISTRY.register(Box::new(histogram_vec.clone())).unwrap();
      histogram_vec
    };

    // Counter: claimed messages by terminal outcome.
    pub static ref MESSAGES_TOTAL: CounterVec = {
        let opts = Opts::new("queue_worker_messages_total", "Claimed messages by outcome");
        let counter_vec = CounterVec::new(opts, &["operation_type", "outcome"]).unwrap();
        REGISTRY.register(Box::new(counter_vec.clone())).unwrap();
        counter_vec
    };

    // Counter: dedup checks that could not reach the durable log.
    pub static ref DEDUP_UNKNOWN_TOTAL: CounterVec = {
        let opts = Opts::new(
            "queue_worker_dedup_unknown_total",
            "Deduplication checks answered as unknown because the durable log was unavailable",
        );
        let counter_vec = CounterVec::new(opts, &["operation_type"]).unwrap();
        REGISTRY.register(Box::new(counter_vec.clone())).unwrap();
        counter_vec
    };

    // Counter: dedup records that expired while their message was still redelivered.
    pub static ref DEDUP_TTL_VIOLATIONS_TOTAL: CounterVec = {
        let opts = Opts::new(
            "queue_worker_dedup_ttl_violations_total",
            "Claims whose lease was not shorter than the dedup TTL",
        );
        let counter_vec = CounterVec::new(opts, &["operation_type"]).unwrap();
        REGISTRY.register(Box::new(counter_vec.clone())).unwrap();
        counter_vec
    };

    // Counter: deletion results.
    pub static ref DELETIONS_TOTAL: CounterVec = {
        let opts = Opts::new("queue_worker_deletions_total", "Message deletions by result");
        let counter_vec = CounterVec::new(opts, &["operation_type", "result"]).unwrap();
        REGISTRY.register(Box::new(counter_vec.clone())).unwrap();
        counter_vec
    };

    // Histogram: delete calls needed per deletion.
    pub static ref DELETE_ATTEMPTS: HistogramVec = {
      let histogram_opts = HistogramOpts::new("queue_worker_delete_attempts", "Delete calls per deletion")
          .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
      let histogram_vec = HistogramVec::new(histogram_opts, &["operation_type"]).unwrap();
      REGISTRY.register(Box::new(histogram_vec.clone())).unwrap();
      histogram_vec
    };

    // Counter: failed claim calls.
    pub static ref CLAIM_ERRORS_TOTAL: CounterVec = {
        let opts = Opts::new("queue_worker_claim_errors_total", "Failed claim calls");
        let counter_vec = CounterVec::new(opts, &["operation_type", "retryable"]).unwrap();
        REGISTRY.register(Box::new(counter_vec.clone())).unwrap();
        counter_vec
    };

    // Gauge: lease requested on the latest claim.
    pub static ref LEASE_TIMEOUT_SECONDS: GaugeVec = {
      let opts = Opts::new("queue_worker_lease_timeout_seconds", "Lease requested on the latest claim");
      let gauge_vec = GaugeVec::new(opts, &["operation_type"]).unwrap();
      REGISTRY.register(Box::new(gauge_vec.clone())).unwrap();
      gauge_vec
    };

    // Gauge: processing duration divided by lease for the latest message.
    pub static ref LEASE_UTILIZATION_RATIO: GaugeVec = {
      let opts = Opts::new(
          "queue_worker_lease_utilization_ratio",
          "Processing duration as a fraction of the lease for the latest message",
      );
      let gauge_vec = GaugeVec::new(opts, &["operation_type"]).unwrap();
      REGISTRY.register(Box::new(gauge_vec.clone())).unwrap();
      gauge_vec
    };

    // Gauge: current idle sleep.
    pub static ref IDLE_BACKOFF_SECONDS: GaugeVec = {
      let opts = Opts::new("queue_worker_idle_backoff_seconds", "Current idle backoff in seconds");
      let gauge_vec = GaugeVec::new(opts, &["operation_type"]).unwrap();
      REGISTRY.register(Box::new(gauge_vec.clone())).unwrap();
      gauge_vec
    };

    // Gauge: empty claims in a row.
    pub static ref CONSECUTIVE_EMPTY_POLLS: GaugeVec = {
      let opts = Opts::new("queue_worker_consecutive_empty_polls", "Consecutive empty claims");
      let gauge_vec = GaugeVec::new(opts, &["operation_type"]).unwrap();
      REGISTRY.register(Box::new(gauge_vec.clone())).unwrap();
      gauge_vec
    };
}

/// Gather all metrics and encode into the provided format.
pub fn gather_metrics() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}
