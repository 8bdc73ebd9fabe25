// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the edgelb operator.
//!
//! All metrics carry the `edgelb_` prefix and are served by the metrics
//! endpoint in `main.rs`.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - notifications handled per resource kind and their outcomes
//! - **Appliance Metrics** - management API calls per appliance and operation
//! - **Status Metrics** - failed status write-backs
//! - **Leader Election Metrics** - leadership state changes
//!
//! # Example
//!
//! ```rust,no_run
//! use edgelb::metrics::record_reconciliation;
//!
//! record_reconciliation("ExternalNatPool", "add", "success", std::time::Duration::from_millis(40));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all edgelb metrics
const METRICS_NAMESPACE: &str = "edgelb";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of handled notifications
///
/// Labels:
/// - `resource_type`: Kind of resource (e.g., `AppExternalNat`)
/// - `event`: `add`, `update`, `delete` or `resync`
/// - `status`: `success`, `error` or `skipped`
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type, event and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "event", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of notification handling in seconds
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `event`: `add`, `update`, `delete` or `resync`
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type and event",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type", "event"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Appliance Metrics
// ============================================================================

/// Total number of appliance API calls
///
/// Labels:
/// - `appliance`: `bigip` or `netscaler`
/// - `operation`: Driver-level operation (e.g., `create_pool`, `bind_cs_policy`)
/// - `outcome`: `success`, `already_exists`, `not_found`, `failure`, or a transport error label
pub static APPLIANCE_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_appliance_operations_total"),
        "Total number of appliance API calls by appliance, operation and outcome",
    );
    let counter = CounterVec::new(opts, &["appliance", "operation", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Status Metrics
// ============================================================================

/// Total number of failed status write-backs
///
/// Labels:
/// - `resource_type`: Kind of resource
pub static STATUS_WRITE_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_status_write_failures_total"),
        "Total number of failed status updates by resource type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// Total number of leader election events
///
/// Labels:
/// - `status`: `acquired` or `lost`
pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_elections_total"),
        "Total number of leader election events by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status
///
/// Labels:
/// - `pod_name`: Election identity of this instance
///
/// Value: 1 if leader, 0 if standby
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = standby)",
    );
    let gauge = GaugeVec::new(opts, &["pod_name"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record one handled notification
///
/// # Arguments
/// * `resource_type` - The kind of resource (e.g., `ExternalNatPool`)
/// * `event` - `add`, `update`, `delete` or `resync`
/// * `status` - `success`, `error` or `skipped`
/// * `duration` - Time spent in the handler
pub fn record_reconciliation(resource_type: &str, event: &str, status: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, event, status])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type, event])
        .observe(duration.as_secs_f64());
}

/// Record one appliance API call
pub fn record_appliance_operation(appliance: &str, operation: &str, outcome: &str) {
    APPLIANCE_OPERATIONS_TOTAL
        .with_label_values(&[appliance, operation, outcome])
        .inc();
}

/// Record a failed status write-back
pub fn record_status_write_failure(resource_type: &str) {
    STATUS_WRITE_FAILURES_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record leader election acquired
///
/// # Arguments
/// * `pod_name` - Election identity that acquired leadership
pub fn record_leader_elected(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(1.0);
}

/// Record leader election lost
///
/// # Arguments
/// * `pod_name` - Election identity that lost leadership
pub fn record_leader_lost(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(0.0);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
