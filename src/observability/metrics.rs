//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `cached_certificate_reconciliations_total` - Total number of reconciliations
//! - `cached_certificate_reconciliation_errors_total` - Total number of reconciliation errors
//! - `cached_certificate_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `cached_certificate_upstream_certificates_created_total` - Upstream Certificates created
//! - `cached_certificate_target_secrets_synced_total` - Target secrets written, by operation
//! - `cached_certificate_ownership_conflicts_total` - Writes refused because the secret is unmanaged
//! - `cached_certificate_fanout_marks_total` - Dependents marked Pending after an upstream secret changed
//! - `cached_certificate_fanout_failures_total` - Dependents the fan-out failed to mark
//! - `cached_certificate_indexed_requests` - Requests currently in the upstream index

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cached_certificate_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cached_certificate_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "cached_certificate_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static UPSTREAM_CERTIFICATES_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cached_certificate_upstream_certificates_created_total",
        "Total number of upstream cert-manager Certificates created in the cache namespace",
    )
    .expect(
        "Failed to create UPSTREAM_CERTIFICATES_CREATED_TOTAL metric - this should never happen",
    )
});

static TARGET_SECRETS_SYNCED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cached_certificate_target_secrets_synced_total",
            "Total number of target secrets written by operation (create, replace)",
        ),
        &["operation"],
    )
    .expect("Failed to create TARGET_SECRETS_SYNCED_TOTAL metric - this should never happen")
});

static OWNERSHIP_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cached_certificate_ownership_conflicts_total",
        "Total number of target secret writes refused because the secret is not managed",
    )
    .expect("Failed to create OWNERSHIP_CONFLICTS_TOTAL metric - this should never happen")
});

static FANOUT_MARKS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cached_certificate_fanout_marks_total",
        "Total number of dependents marked Pending after an upstream secret changed",
    )
    .expect("Failed to create FANOUT_MARKS_TOTAL metric - this should never happen")
});

static FANOUT_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cached_certificate_fanout_failures_total",
        "Total number of failed attempts to mark a dependent Pending",
    )
    .expect("Failed to create FANOUT_FAILURES_TOTAL metric - this should never happen")
});

static INDEXED_REQUESTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "cached_certificate_indexed_requests",
        "Current number of requests referencing an upstream Certificate",
    )
    .expect("Failed to create INDEXED_REQUESTS metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_CERTIFICATES_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TARGET_SECRETS_SYNCED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OWNERSHIP_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FANOUT_MARKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FANOUT_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INDEXED_REQUESTS.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_upstream_certificates_created() {
    UPSTREAM_CERTIFICATES_CREATED_TOTAL.inc();
}

pub fn increment_target_secrets_synced(operation: &str) {
    TARGET_SECRETS_SYNCED_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn increment_ownership_conflicts() {
    OWNERSHIP_CONFLICTS_TOTAL.inc();
}

pub fn increment_fanout_marks() {
    FANOUT_MARKS_TOTAL.inc();
}

pub fn increment_fanout_failures() {
    FANOUT_FAILURES_TOTAL.inc();
}

pub fn set_indexed_requests(count: usize) {
    INDEXED_REQUESTS.set(i64::try_from(count).unwrap_or(i64::MAX));
}
