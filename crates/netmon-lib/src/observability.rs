//! Observability infrastructure for the telemetry monitor
//!
//! Prometheus metrics for the pipeline, storage sweeps and alert
//! lifecycle. Structured logging happens inline at the call sites via
//! tracing.

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Default histogram buckets for stage latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MonitorMetricsInner {
    records_processed: IntCounter,
    records_dropped: IntCounter,
    records_rejected: IntCounter,
    anomalies_detected: IntCounterVec,
    alerts_created: IntCounter,
    alerts_escalated: IntCounter,
    alerts_recovered: IntCounter,
    retention_deleted: IntCounter,
    archived_rows: IntCounter,
    store_errors: IntCounter,
    queue_depth: IntGauge,
    stage_latency_seconds: HistogramVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            records_processed: register_int_counter!(
                "netmon_records_processed_total",
                "Records that completed every pipeline stage"
            )
            .expect("Failed to register records_processed"),

            records_dropped: register_int_counter!(
                "netmon_records_dropped_total",
                "Records abandoned mid-pipeline by a stage drop or error"
            )
            .expect("Failed to register records_dropped"),

            records_rejected: register_int_counter!(
                "netmon_records_rejected_total",
                "Records rejected by validation"
            )
            .expect("Failed to register records_rejected"),

            anomalies_detected: register_int_counter_vec!(
                "netmon_anomalies_detected_total",
                "Anomalies detected, by rule family",
                &["kind"]
            )
            .expect("Failed to register anomalies_detected"),

            alerts_created: register_int_counter!(
                "netmon_alerts_created_total",
                "Fresh alerts inserted"
            )
            .expect("Failed to register alerts_created"),

            alerts_escalated: register_int_counter!(
                "netmon_alerts_escalated_total",
                "Alerts escalated to a higher severity"
            )
            .expect("Failed to register alerts_escalated"),

            alerts_recovered: register_int_counter!(
                "netmon_alerts_recovered_total",
                "Alerts auto-recovered by the sweep"
            )
            .expect("Failed to register alerts_recovered"),

            retention_deleted: register_int_counter!(
                "netmon_retention_deleted_rows_total",
                "Rows deleted by retention sweeps"
            )
            .expect("Failed to register retention_deleted"),

            archived_rows: register_int_counter!(
                "netmon_archived_rows_total",
                "Raw rows rolled up into archives"
            )
            .expect("Failed to register archived_rows"),

            store_errors: register_int_counter!(
                "netmon_store_errors_total",
                "Durable store operation failures"
            )
            .expect("Failed to register store_errors"),

            queue_depth: register_int_gauge!(
                "netmon_pipeline_queue_depth",
                "Records currently waiting in the pipeline queue"
            )
            .expect("Failed to register queue_depth"),

            stage_latency_seconds: register_histogram_vec!(
                "netmon_stage_latency_seconds",
                "Time spent processing one record in one stage",
                &["stage"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_latency_seconds"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_records_processed(&self) {
        self.inner().records_processed.inc();
    }

    pub fn inc_records_dropped(&self) {
        self.inner().records_dropped.inc();
    }

    pub fn inc_records_rejected(&self) {
        self.inner().records_rejected.inc();
    }

    pub fn inc_anomalies_detected(&self, kind: &str) {
        self.inner().anomalies_detected.with_label_values(&[kind]).inc();
    }

    pub fn inc_alerts_created(&self) {
        self.inner().alerts_created.inc();
    }

    pub fn inc_alerts_escalated(&self) {
        self.inner().alerts_escalated.inc();
    }

    pub fn inc_alerts_recovered(&self) {
        self.inner().alerts_recovered.inc();
    }

    pub fn add_retention_deleted(&self, rows: u64) {
        self.inner().retention_deleted.inc_by(rows);
    }

    pub fn add_archived_rows(&self, rows: u64) {
        self.inner().archived_rows.inc_by(rows);
    }

    pub fn inc_store_errors(&self) {
        self.inner().store_errors.inc();
    }

    pub fn inc_queue_depth(&self) {
        self.inner().queue_depth.inc();
    }

    pub fn dec_queue_depth(&self) {
        self.inner().queue_depth.dec();
    }

    /// Record how long one stage took for one record
    pub fn observe_stage_latency(&self, stage: &str, duration_secs: f64) {
        self.inner()
            .stage_latency_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_creation() {
        // Note: this test may fail if run multiple times in the same
        // process due to the Prometheus global registry. In practice,
        // metrics are created once. We test the structure here.
        let metrics = MonitorMetrics::new();

        metrics.inc_records_processed();
        metrics.inc_records_dropped();
        metrics.inc_records_rejected();
        metrics.inc_anomalies_detected("threshold");
        metrics.inc_alerts_created();
        metrics.add_retention_deleted(5);
        metrics.inc_queue_depth();
        metrics.dec_queue_depth();
        metrics.observe_stage_latency("normalize", 0.001);
    }
}
