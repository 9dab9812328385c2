//! Record normalization
//!
//! First pipeline stage: validates mandatory fields, repairs the clock,
//! clamps negative counters and flags implausibly large samples.

use super::Stage;
use crate::models::TelemetryRecord;
use crate::observability::MonitorMetrics;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

/// Default ceiling above which a byte counter is considered implausible
/// (~1 TB in a single sample)
const DEFAULT_SUSPICIOUS_BYTES: i64 = 1_000_000_000_000;

/// Timestamp formats accepted from collectors, tried in order after
/// RFC 3339
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Configuration for the normalizer stage
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Byte counters above this value are kept but flagged suspicious
    pub suspicious_bytes_ceiling: i64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            suspicious_bytes_ceiling: DEFAULT_SUSPICIOUS_BYTES,
        }
    }
}

/// Validates and cleans one raw telemetry record
pub struct Normalizer {
    config: NormalizerConfig,
    metrics: MonitorMetrics,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Parse a collector timestamp, falling back to `now` when the
    /// string matches no accepted format
    fn parse_timestamp(&self, source_id: &str, raw: &str) -> DateTime<Utc> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return ts.with_timezone(&Utc);
        }

        for format in TIMESTAMP_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Utc.from_utc_datetime(&naive);
            }
        }

        warn!(
            source_id = %source_id,
            timestamp = %raw,
            "Unparseable timestamp, falling back to current time"
        );
        Utc::now()
    }

    /// Clamp a counter to zero, warning when a negative value is repaired
    fn clean_counter(&self, source_id: &str, field: &str, value: Option<i64>) -> i64 {
        match value {
            Some(v) if v < 0 => {
                warn!(
                    source_id = %source_id,
                    field = %field,
                    value = v,
                    "Negative counter clamped to zero"
                );
                0
            }
            Some(v) => v,
            // Missing counter-type fields default to zero
            None => 0,
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

#[async_trait]
impl Stage for Normalizer {
    fn name(&self) -> &str {
        "normalize"
    }

    async fn process(&self, mut record: TelemetryRecord) -> Result<Option<TelemetryRecord>> {
        // Mandatory fields: source, timestamp, and some payload
        if record.source_id.is_empty() {
            warn!("Record rejected: missing source id");
            self.metrics.inc_records_rejected();
            return Ok(None);
        }
        let Some(raw_ts) = record.timestamp.clone() else {
            warn!(source_id = %record.source_id, "Record rejected: missing timestamp");
            self.metrics.inc_records_rejected();
            return Ok(None);
        };
        if !record.has_payload() {
            warn!(source_id = %record.source_id, "Record rejected: empty payload");
            self.metrics.inc_records_rejected();
            return Ok(None);
        }

        record.observed_at = Some(self.parse_timestamp(&record.source_id, &raw_ts));

        record.in_bytes = Some(self.clean_counter(&record.source_id, "in_bytes", record.in_bytes));
        record.out_bytes =
            Some(self.clean_counter(&record.source_id, "out_bytes", record.out_bytes));
        record.in_packets =
            Some(self.clean_counter(&record.source_id, "in_packets", record.in_packets));
        record.out_packets =
            Some(self.clean_counter(&record.source_id, "out_packets", record.out_packets));

        // Implausible byte volumes are kept for downstream caution,
        // never silently dropped
        let ceiling = self.config.suspicious_bytes_ceiling;
        for (field, value) in [
            ("in_bytes", record.in_bytes),
            ("out_bytes", record.out_bytes),
        ] {
            if let Some(v) = value {
                if v > ceiling {
                    warn!(
                        source_id = %record.source_id,
                        field = %field,
                        value = v,
                        "Implausibly large counter, record flagged suspicious"
                    );
                    record.suspicious = true;
                }
            }
        }

        record.cleaned = true;
        debug!(source_id = %record.source_id, "Record normalized");
        Ok(Some(record))
    }
}
