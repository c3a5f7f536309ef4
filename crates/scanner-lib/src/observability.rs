//! Observability infrastructure for the scanner
//!
//! Provides:
//! - Prometheus metrics (scan latency, retries, evaluations, cache hit rate)
//! - Structured JSON logging with tracing

use crate::models::{IdleVerdict, ScanReport};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for scan durations (in seconds)
const SCAN_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScanMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ScanMetricsInner {
    scan_duration_seconds: HistogramVec,
    scans_total: IntCounterVec,
    remote_call_retries: IntCounterVec,
    resources_evaluated: IntCounterVec,
    evaluation_failures: IntCounterVec,
    idle_resources: IntGaugeVec,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_corruptions: IntCounter,
}

impl ScanMetricsInner {
    fn new() -> Self {
        Self {
            scan_duration_seconds: register_histogram_vec!(
                "idle_scanner_scan_duration_seconds",
                "Wall time of one scan pass",
                &["source"],
                SCAN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register scan_duration_seconds"),

            scans_total: register_int_counter_vec!(
                "idle_scanner_scans_total",
                "Scans by outcome (fresh, cached, failed)",
                &["outcome"]
            )
            .expect("Failed to register scans_total"),

            remote_call_retries: register_int_counter_vec!(
                "idle_scanner_remote_call_retries_total",
                "Retries of remote calls after transient failures",
                &["operation"]
            )
            .expect("Failed to register remote_call_retries"),

            resources_evaluated: register_int_counter_vec!(
                "idle_scanner_resources_evaluated_total",
                "Resources classified",
                &["tenant"]
            )
            .expect("Failed to register resources_evaluated"),

            evaluation_failures: register_int_counter_vec!(
                "idle_scanner_evaluation_failures_total",
                "Regions or resources that could not be evaluated",
                &["tenant", "stage"]
            )
            .expect("Failed to register evaluation_failures"),

            idle_resources: register_int_gauge_vec!(
                "idle_scanner_idle_resources",
                "Idle resources found by the latest scan",
                &["tenant"]
            )
            .expect("Failed to register idle_resources"),

            cache_hits: register_int_counter!(
                "idle_scanner_cache_hits_total",
                "Result cache lookups served from a fresh entry"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_counter!(
                "idle_scanner_cache_misses_total",
                "Result cache lookups that found no fresh entry"
            )
            .expect("Failed to register cache_misses"),

            cache_corruptions: register_int_counter!(
                "idle_scanner_cache_corruptions_total",
                "Unreadable cache entries absorbed as misses"
            )
            .expect("Failed to register cache_corruptions"),
        }
    }
}

/// Scanner metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScanMetrics {
    _private: (),
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScanMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScanMetricsInner {
        GLOBAL_METRICS.get_or_init(ScanMetricsInner::new)
    }

    pub fn observe_scan_duration(&self, source: &str, duration_secs: f64) {
        self.inner()
            .scan_duration_seconds
            .with_label_values(&[source])
            .observe(duration_secs);
    }

    pub fn inc_scans(&self, outcome: &str) {
        self.inner().scans_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_retries(&self, operation: &str) {
        self.inner()
            .remote_call_retries
            .with_label_values(&[operation])
            .inc();
    }

    pub fn add_resources_evaluated(&self, tenant: &str, count: u64) {
        self.inner()
            .resources_evaluated
            .with_label_values(&[tenant])
            .inc_by(count);
    }

    pub fn inc_evaluation_failures(&self, tenant: &str, stage: &str) {
        self.inner()
            .evaluation_failures
            .with_label_values(&[tenant, stage])
            .inc();
    }

    pub fn set_idle_resources(&self, tenant: &str, count: i64) {
        self.inner()
            .idle_resources
            .with_label_values(&[tenant])
            .set(count);
    }

    pub fn inc_cache_hits(&self) {
        self.inner().cache_hits.inc();
    }

    pub fn inc_cache_misses(&self) {
        self.inner().cache_misses.inc();
    }

    pub fn inc_cache_corruptions(&self) {
        self.inner().cache_corruptions.inc();
    }
}

/// Structured logger for scan events
///
/// Provides consistent JSON-formatted logging for scans and findings.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log the start of a scan pass
    pub fn log_scan_started(&self, tenant_id: &str, window_days: u32, force_refresh: bool) {
        info!(
            event = "scan_started",
            instance = %self.instance,
            tenant_id = %tenant_id,
            window_days = window_days,
            force_refresh = force_refresh,
            "Scan started"
        );
    }

    /// Log a completed scan
    pub fn log_scan_completed(&self, report: &ScanReport, elapsed_ms: u64) {
        let idle = report.idle_count();
        if report.failure_count > 0 {
            warn!(
                event = "scan_completed",
                instance = %self.instance,
                tenant_id = %report.tenant_id,
                from_cache = report.from_cache,
                evaluated = report.success_count,
                failed = report.failure_count,
                idle = idle,
                elapsed_ms = elapsed_ms,
                "Scan completed with incomplete coverage"
            );
        } else {
            info!(
                event = "scan_completed",
                instance = %self.instance,
                tenant_id = %report.tenant_id,
                from_cache = report.from_cache,
                evaluated = report.success_count,
                failed = 0,
                idle = idle,
                elapsed_ms = elapsed_ms,
                "Scan completed"
            );
        }
    }

    /// Log one idle finding
    pub fn log_idle_resource(&self, tenant_id: &str, verdict: &IdleVerdict) {
        info!(
            event = "idle_resource_found",
            instance = %self.instance,
            tenant_id = %tenant_id,
            resource_id = %verdict.resource_id,
            display_name = %verdict.display_name,
            region = %verdict.region,
            reasons = %verdict.reasons.join("; "),
            "Idle resource found"
        );
    }

    /// Log a scan that could not complete
    pub fn log_scan_failed(&self, tenant_id: &str, error: &dyn std::error::Error) {
        warn!(
            event = "scan_failed",
            instance = %self.instance,
            tenant_id = %tenant_id,
            error = %error,
            "Scan failed"
        );
    }

    /// Log scanner startup
    pub fn log_startup(&self, version: &str, tenants: usize) {
        info!(
            event = "scanner_started",
            instance = %self.instance,
            version = %version,
            tenants = tenants,
            "Idle scanner started"
        );
    }

    /// Log scanner shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scanner_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Idle scanner shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_metrics_creation() {
        // Metrics live in the global Prometheus registry; creating several
        // handles must not register twice.
        let metrics = ScanMetrics::new();
        let again = ScanMetrics::new();

        metrics.observe_scan_duration("fresh", 1.5);
        metrics.inc_scans("fresh");
        metrics.inc_retries("list_regions");
        metrics.add_resources_evaluated("acme", 3);
        metrics.inc_evaluation_failures("acme", "metric_fetch");
        again.set_idle_resources("acme", 2);
        again.inc_cache_hits();
        again.inc_cache_misses();
        again.inc_cache_corruptions();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("scanner-0");
        assert_eq!(logger.instance, "scanner-0");
    }
}
