//! Derived metric calculation
//!
//! Second pipeline stage: turns cleaned counters into rates, bandwidth
//! utilization and growth percentages. Values are only computed when
//! their inputs are present and meaningful; nothing is zero-faked and
//! no clamping happens here (consumers clamp at evaluation points).

use super::Stage;
use crate::models::{ProcessedMetrics, TelemetryRecord};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Computes rates, utilization and growth for a cleaned record
#[derive(Debug, Default)]
pub struct RateCalculator;

impl RateCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Percentage growth of `current` against a non-zero historical value
    fn growth_pct(current: i64, historical: i64) -> Option<f64> {
        if historical == 0 {
            return None;
        }
        Some((current - historical) as f64 / historical as f64 * 100.0)
    }
}

#[async_trait]
impl Stage for RateCalculator {
    fn name(&self) -> &str {
        "calculate"
    }

    async fn process(&self, mut record: TelemetryRecord) -> Result<Option<TelemetryRecord>> {
        if !record.cleaned {
            // Defensive pass-through: an uncleaned record is not this
            // stage's contract, but it is not a hard failure either
            warn!(source_id = %record.source_id, "Received uncleaned record, passing through");
            return Ok(Some(record));
        }

        let mut metrics = ProcessedMetrics::default();

        // Rates require a positive interval; otherwise omitted
        if let Some(interval) = record.interval_seconds.filter(|i| *i > 0) {
            let interval = interval as f64;
            metrics.in_rate = record.in_bytes.map(|b| b as f64 / interval);
            metrics.out_rate = record.out_bytes.map(|b| b as f64 / interval);
        }

        // Utilization requires a known interface capacity
        if let Some(bandwidth) = record.bandwidth_bps.filter(|b| *b > 0) {
            let bandwidth = bandwidth as f64;
            metrics.in_utilization_pct = metrics.in_rate.map(|r| r * 8.0 / bandwidth * 100.0);
            metrics.out_utilization_pct = metrics.out_rate.map(|r| r * 8.0 / bandwidth * 100.0);
        }

        if let Some(historical) = record.historical {
            if let Some(current) = record.in_bytes {
                metrics.in_growth_pct = Self::growth_pct(current, historical.in_bytes);
            }
            if let Some(current) = record.out_bytes {
                metrics.out_growth_pct = Self::growth_pct(current, historical.out_bytes);
            }
        }

        debug!(source_id = %record.source_id, "Metrics calculated");
        record.metrics = Some(metrics);
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoricalCounters;

    fn cleaned_record() -> TelemetryRecord {
        let mut record = TelemetryRecord::new("device-1:eth0");
        record.cleaned = true;
        record.in_bytes = Some(6_000);
        record.out_bytes = Some(3_000);
        record.in_packets = Some(10);
        record.out_packets = Some(5);
        record.interval_seconds = Some(60);
        record.bandwidth_bps = Some(8_000);
        record
    }

    #[tokio::test]
    async fn test_rates_computed() {
        let calc = RateCalculator::new();
        let result = calc.process(cleaned_record()).await.unwrap().unwrap();
        let metrics = result.metrics.unwrap();

        assert_eq!(metrics.in_rate, Some(100.0));
        assert_eq!(metrics.out_rate, Some(50.0));
    }

    #[tokio::test]
    async fn test_utilization_computed() {
        let calc = RateCalculator::new();
        let result = calc.process(cleaned_record()).await.unwrap().unwrap();
        let metrics = result.metrics.unwrap();

        // 100 B/s = 800 bps over an 8000 bps link = 10%
        assert_eq!(metrics.in_utilization_pct, Some(10.0));
        assert_eq!(metrics.out_utilization_pct, Some(5.0));
    }

    #[tokio::test]
    async fn test_zero_interval_omits_rates() {
        let calc = RateCalculator::new();
        let mut record = cleaned_record();
        record.interval_seconds = Some(0);

        let metrics = calc.process(record).await.unwrap().unwrap().metrics.unwrap();
        assert!(metrics.in_rate.is_none());
        assert!(metrics.in_utilization_pct.is_none());
    }

    #[tokio::test]
    async fn test_zero_bandwidth_omits_utilization() {
        let calc = RateCalculator::new();
        let mut record = cleaned_record();
        record.bandwidth_bps = Some(0);

        let metrics = calc.process(record).await.unwrap().unwrap().metrics.unwrap();
        assert!(metrics.in_rate.is_some());
        assert!(metrics.in_utilization_pct.is_none());
    }

    #[tokio::test]
    async fn test_growth_against_history() {
        let calc = RateCalculator::new();
        let mut record = cleaned_record();
        record.historical = Some(HistoricalCounters {
            in_bytes: 4_000,
            out_bytes: 0,
        });

        let metrics = calc.process(record).await.unwrap().unwrap().metrics.unwrap();
        assert_eq!(metrics.in_growth_pct, Some(50.0));
        // Zero historical baseline: growth omitted, not infinite
        assert!(metrics.out_growth_pct.is_none());
    }

    #[tokio::test]
    async fn test_uncleaned_record_passes_through() {
        let calc = RateCalculator::new();
        let mut record = cleaned_record();
        record.cleaned = false;

        let result = calc.process(record).await.unwrap().unwrap();
        assert!(result.metrics.is_none());
    }

    #[tokio::test]
    async fn test_utilization_may_exceed_hundred() {
        let calc = RateCalculator::new();
        let mut record = cleaned_record();
        // 1000 B/s = 8000 bps on a 4000 bps link = 200%
        record.in_bytes = Some(60_000);
        record.bandwidth_bps = Some(4_000);

        let metrics = calc.process(record).await.unwrap().unwrap().metrics.unwrap();
        assert_eq!(metrics.in_utilization_pct, Some(200.0));
    }
}
