// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the Octavia load balancer engine.
//!
//! All metrics carry the namespace prefix `octavia_lb`.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Ensure, update and delete passes and their outcomes
//! - **Cloud API Metrics** - Remote calls issued by the reconcilers and their latency
//! - **Resource Lifecycle Metrics** - Cloud resources created, updated and deleted
//!
//! # Example
//!
//! ```rust,no_run
//! use octavia_lb::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("ensure", std::time::Duration::from_millis(850));
//! ```

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all metrics
const METRICS_NAMESPACE: &str = "octavia_lb";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliation passes by verb and outcome
///
/// Labels:
/// - `verb`: `ensure`, `update` or `delete`
/// - `status`: `success` or the error reason
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliation passes by verb and outcome",
    );
    let counter = CounterVec::new(opts, &["verb", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliation passes in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliation passes in seconds by verb",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]);
    let histogram = HistogramVec::new(opts, &["verb"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Cloud API Metrics
// ============================================================================

/// Total number of cloud API calls by operation and outcome
///
/// Labels:
/// - `operation`: Facade operation (e.g. `create_listener`)
/// - `status`: `success`, `not_found` or `error`
pub static CLOUD_CALLS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_cloud_calls_total"),
        "Total number of cloud API calls by operation and outcome",
    );
    let counter = CounterVec::new(opts, &["operation", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Latency of cloud API calls in seconds
pub static CLOUD_CALL_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_cloud_call_duration_seconds"),
        "Latency of cloud API calls in seconds by operation",
    )
    .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]);
    let histogram = HistogramVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Resource Lifecycle Metrics
// ============================================================================

/// Cloud resources changed by the reconcilers
///
/// Labels:
/// - `kind`: `loadbalancer`, `listener`, `pool`, `member`, `healthmonitor`,
///   `floatingip`, `securitygroup` or `securitygrouprule`
/// - `action`: `created`, `updated` or `deleted`
pub static RESOURCE_CHANGES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resource_changes_total"),
        "Cloud resources changed by kind and action",
    );
    let counter = CounterVec::new(opts, &["kind", "action"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation pass
pub fn record_reconciliation_success(verb: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[verb, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[verb])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation pass
///
/// # Arguments
/// * `verb` - `ensure`, `update` or `delete`
/// * `reason` - CamelCase error reason
/// * `duration` - Duration of the pass before it failed
pub fn record_reconciliation_error(verb: &str, reason: &str, duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&[verb, reason]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[verb])
        .observe(duration.as_secs_f64());
}

/// Record a completed cloud API call
pub fn record_cloud_call(operation: &str, status: &str, duration: Duration) {
    CLOUD_CALLS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    CLOUD_CALL_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn record_resource_created(kind: &str) {
    RESOURCE_CHANGES_TOTAL
        .with_label_values(&[kind, "created"])
        .inc();
}

pub fn record_resource_updated(kind: &str) {
    RESOURCE_CHANGES_TOTAL
        .with_label_values(&[kind, "updated"])
        .inc();
}

pub fn record_resource_deleted(kind: &str) {
    RESOURCE_CHANGES_TOTAL
        .with_label_values(&[kind, "deleted"])
        .inc();
}

/// Gather all metrics in Prometheus text format
///
/// # Errors
///
/// Returns an error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
