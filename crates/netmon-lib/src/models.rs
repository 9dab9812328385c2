//! Core data models for the telemetry monitor

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One measurement from one source/interface at one instant.
///
/// Records arrive from collectors with most fields optional; the
/// normalizer fills defaults, repairs the clock and sets `cleaned`.
/// Downstream stages attach `metrics` and `anomalies` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryRecord {
    /// Source identity, e.g. `"device-7:eth0"`
    pub source_id: String,
    pub device_id: Option<i64>,
    /// Raw timestamp as delivered by the collector
    pub timestamp: Option<String>,
    /// Parsed observation time, set by the normalizer
    pub observed_at: Option<DateTime<Utc>>,
    pub in_bytes: Option<i64>,
    pub out_bytes: Option<i64>,
    pub in_packets: Option<i64>,
    pub out_packets: Option<i64>,
    /// Interface capacity in bits per second
    pub bandwidth_bps: Option<i64>,
    pub interval_seconds: Option<u32>,
    /// Prior-period counters for growth computation
    pub historical: Option<HistoricalCounters>,
    pub cleaned: bool,
    pub suspicious: bool,
    pub metrics: Option<ProcessedMetrics>,
    pub anomalies: Vec<Anomaly>,
}

impl TelemetryRecord {
    /// Create an empty raw record for the given source
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            device_id: None,
            timestamp: None,
            observed_at: None,
            in_bytes: None,
            out_bytes: None,
            in_packets: None,
            out_packets: None,
            bandwidth_bps: None,
            interval_seconds: None,
            historical: None,
            cleaned: false,
            suspicious: false,
            metrics: None,
            anomalies: Vec::new(),
        }
    }

    /// True if the record carries at least one counter value
    pub fn has_payload(&self) -> bool {
        self.in_bytes.is_some()
            || self.out_bytes.is_some()
            || self.in_packets.is_some()
            || self.out_packets.is_some()
    }
}

impl Default for TelemetryRecord {
    fn default() -> Self {
        Self::new("")
    }
}

/// Counters from a comparable earlier period
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoricalCounters {
    pub in_bytes: i64,
    pub out_bytes: i64,
}

/// Derived metrics attached to a record after calculation.
///
/// Every field is optional: a value is omitted, never zero-faked, when
/// its inputs are unavailable. No clamping is applied here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcessedMetrics {
    /// Inbound rate in bytes per second
    pub in_rate: Option<f64>,
    /// Outbound rate in bytes per second
    pub out_rate: Option<f64>,
    pub in_utilization_pct: Option<f64>,
    pub out_utilization_pct: Option<f64>,
    pub in_growth_pct: Option<f64>,
    pub out_growth_pct: Option<f64>,
}

/// Family of rule that produced an anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Threshold,
    Trend,
    Baseline,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::Threshold => write!(f, "threshold"),
            AnomalyKind::Trend => write!(f, "trend"),
            AnomalyKind::Baseline => write!(f, "baseline"),
        }
    }
}

/// Alert severity; ordering allows escalation via `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One detected deviation, produced by the detector.
///
/// Ephemeral: consumed by the persister (audit trail) and the alert
/// engine, never stored as its own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// Metric the rule fired on, e.g. `"in_utilization_pct"`
    pub metric: String,
    pub value: f64,
    /// Threshold, baseline mean or growth reference the value was
    /// compared against
    pub reference: f64,
    pub severity: Severity,
    pub message: String,
}

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    TrafficHigh,
    TrafficSurge,
    TrafficAnomaly,
    DeviceOffline,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::TrafficHigh => write!(f, "traffic_high"),
            AlertType::TrafficSurge => write!(f, "traffic_surge"),
            AlertType::TrafficAnomaly => write!(f, "traffic_anomaly"),
            AlertType::DeviceOffline => write!(f, "device_offline"),
        }
    }
}

impl AlertType {
    /// Alert classification for an anomaly family
    pub fn from_anomaly(kind: AnomalyKind) -> Self {
        match kind {
            AnomalyKind::Threshold => AlertType::TrafficHigh,
            AnomalyKind::Trend => AlertType::TrafficSurge,
            AnomalyKind::Baseline => AlertType::TrafficAnomaly,
        }
    }
}

/// Durable alert entity representing an ongoing or resolved problem.
///
/// At most one open (`is_handled == false`) alert exists per
/// `(device_id, alert_type)`; repeated detections refresh it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub device_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Value that triggered or last refreshed the alert
    pub value: f64,
    pub threshold: f64,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_handled: bool,
    pub handled_by: Option<i64>,
    pub handled_at: Option<DateTime<Utc>>,
    pub is_recovered: bool,
    pub recovered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a fresh alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub device_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// Raw-counter row as persisted in the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub device_id: i64,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub in_bytes: i64,
    pub out_bytes: i64,
    pub in_packets: i64,
    pub out_packets: i64,
    pub interval_seconds: u32,
}

/// Derived-stats row as persisted in the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRow {
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub in_rate: f64,
    pub out_rate: f64,
    pub in_utilization_pct: f64,
    pub out_utilization_pct: f64,
    /// Full metrics payload as JSON, for audit
    pub details: String,
}

/// Per-device-per-day rollup produced by archival before raw rows are
/// deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveAggregate {
    pub device_id: i64,
    pub day: NaiveDate,
    pub total_in_bytes: i64,
    pub total_out_bytes: i64,
    pub total_in_packets: i64,
    pub total_out_packets: i64,
    pub sample_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::Warning.max(Severity::Critical), Severity::Critical);
    }

    #[test]
    fn test_alert_type_from_anomaly() {
        assert_eq!(
            AlertType::from_anomaly(AnomalyKind::Threshold),
            AlertType::TrafficHigh
        );
        assert_eq!(
            AlertType::from_anomaly(AnomalyKind::Baseline),
            AlertType::TrafficAnomaly
        );
    }

    #[test]
    fn test_record_payload_detection() {
        let mut record = TelemetryRecord::new("device-1:eth0");
        assert!(!record.has_payload());

        record.in_bytes = Some(1024);
        assert!(record.has_payload());
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
