//! Record persistence
//!
//! Final pipeline stage: writes raw counters and derived stats through
//! the hybrid storage tier and logs the record's anomalies as an audit
//! trail. Storage failures are logged and swallowed; persistence never
//! kills a record that already produced detections.

use super::Stage;
use crate::models::{StatsRow, TelemetryRecord, TelemetryRow};
use crate::storage::HybridStorage;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default sampling interval assumed when a record does not carry one
const DEFAULT_INTERVAL_SECONDS: u32 = 300;

pub struct Persister {
    storage: Arc<HybridStorage>,
}

impl Persister {
    pub fn new(storage: Arc<HybridStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Stage for Persister {
    fn name(&self) -> &str {
        "persist"
    }

    async fn process(&self, record: TelemetryRecord) -> Result<Option<TelemetryRecord>> {
        for anomaly in &record.anomalies {
            info!(
                source_id = %record.source_id,
                kind = %anomaly.kind,
                metric = %anomaly.metric,
                severity = %anomaly.severity,
                value = anomaly.value,
                "Anomaly recorded"
            );
        }

        // Rows are keyed by device; a record without one has nowhere
        // to land
        let Some(device_id) = record.device_id else {
            warn!(source_id = %record.source_id, "No device id, record not persisted");
            return Ok(Some(record));
        };

        let timestamp = record.observed_at.unwrap_or_else(Utc::now);
        let row = TelemetryRow {
            device_id,
            source_id: record.source_id.clone(),
            timestamp,
            in_bytes: record.in_bytes.unwrap_or(0),
            out_bytes: record.out_bytes.unwrap_or(0),
            in_packets: record.in_packets.unwrap_or(0),
            out_packets: record.out_packets.unwrap_or(0),
            interval_seconds: record.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS),
        };
        if let Err(e) = self.storage.save_sample(row).await {
            warn!(source_id = %record.source_id, error = %e, "Raw sample write failed");
        }

        if let Some(metrics) = &record.metrics {
            let details =
                serde_json::to_string(metrics).unwrap_or_else(|_| String::from("{}"));
            let stats = StatsRow {
                device_id,
                timestamp,
                in_rate: metrics.in_rate.unwrap_or(0.0),
                out_rate: metrics.out_rate.unwrap_or(0.0),
                in_utilization_pct: metrics.in_utilization_pct.unwrap_or(0.0),
                out_utilization_pct: metrics.out_utilization_pct.unwrap_or(0.0),
                details,
            };
            if let Err(e) = self.storage.save_stats(stats).await {
                warn!(source_id = %record.source_id, error = %e, "Stats write failed");
            }
        }

        debug!(source_id = %record.source_id, "Record persisted");
        Ok(Some(record))
    }
}
