//! Anomaly detection
//!
//! Third pipeline stage: evaluates three independent rule families
//! against a record's derived metrics (static thresholds, growth trend,
//! per-source rolling baseline z-score) and hands detected anomalies to
//! the alert engine over a non-blocking channel.

use super::Stage;
use crate::models::{Anomaly, AnomalyKind, Severity, TelemetryRecord};
use crate::observability::MonitorMetrics;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Number of observations kept in each per-source baseline window
const DEFAULT_BASELINE_WINDOW: usize = 24;

/// Configuration for the anomaly detector
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Utilization percentage above which a warning fires
    pub utilization_warning_pct: f64,
    /// Utilization percentage above which the anomaly is critical
    pub utilization_critical_pct: f64,
    /// Growth percentage above which a warning fires (one-sided)
    pub growth_warning_pct: f64,
    pub growth_critical_pct: f64,
    /// Z-score above which a baseline deviation is a warning
    pub z_warning: f64,
    pub z_critical: f64,
    /// Observations kept per source for baseline statistics
    pub baseline_window: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            utilization_warning_pct: 80.0,
            utilization_critical_pct: 90.0,
            growth_warning_pct: 50.0,
            growth_critical_pct: 100.0,
            z_warning: 3.0,
            z_critical: 5.0,
            baseline_window: DEFAULT_BASELINE_WINDOW,
        }
    }
}

/// Rolling per-source statistics for baseline detection.
///
/// Holds a sliding window of the most recent inbound rates; mean and
/// standard deviation (population form) are recomputed on every
/// observation.
#[derive(Debug, Clone)]
pub struct BaselineState {
    window: VecDeque<f64>,
    capacity: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub last_updated: DateTime<Utc>,
}

impl BaselineState {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            mean: 0.0,
            std_dev: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Number of observations currently in the window
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Append a value, evicting the oldest observation once the window
    /// is full, and recompute statistics
    pub fn observe(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.recalculate();
        self.last_updated = Utc::now();
    }

    fn recalculate(&mut self) {
        let count = self.window.len();
        if count == 0 {
            self.mean = 0.0;
            self.std_dev = 0.0;
            return;
        }

        self.mean = self.window.iter().sum::<f64>() / count as f64;

        // std_dev stays zero until the window holds at least 2 samples
        if count > 1 {
            let variance = self
                .window
                .iter()
                .map(|v| (v - self.mean).powi(2))
                .sum::<f64>()
                / count as f64;
            self.std_dev = variance.sqrt();
        } else {
            self.std_dev = 0.0;
        }
    }
}

/// Anomaly plus its origin, handed to the alert engine
#[derive(Debug, Clone)]
pub struct AnomalySignal {
    pub device_id: Option<i64>,
    pub source_id: String,
    pub anomaly: Anomaly,
}

/// Evaluates threshold, trend and baseline rules against a record.
///
/// Baseline state is keyed by source id in a concurrent map; a source's
/// compare-and-update runs under that entry's lock, so concurrent
/// workers never lose a window update.
pub struct AnomalyDetector {
    config: DetectorConfig,
    baselines: DashMap<String, BaselineState>,
    signal_tx: Option<mpsc::Sender<AnomalySignal>>,
    metrics: MonitorMetrics,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            baselines: DashMap::new(),
            signal_tx: None,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Attach the channel used to hand anomalies to the alert engine
    pub fn with_signal_channel(mut self, tx: mpsc::Sender<AnomalySignal>) -> Self {
        self.signal_tx = Some(tx);
        self
    }

    /// Number of sources with baseline state
    pub fn tracked_sources(&self) -> usize {
        self.baselines.len()
    }

    fn severity_for(&self, value: f64, warning: f64, critical: f64) -> Option<Severity> {
        if value > critical {
            Some(Severity::Critical)
        } else if value > warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    /// Threshold rule: bandwidth utilization per direction.
    ///
    /// Values over 100% (possible because the calculator does not
    /// clamp) still classify, as critical.
    fn check_thresholds(&self, record: &TelemetryRecord, found: &mut Vec<Anomaly>) {
        let Some(metrics) = &record.metrics else {
            return;
        };

        for (metric, direction, value) in [
            ("in_utilization_pct", "inbound", metrics.in_utilization_pct),
            ("out_utilization_pct", "outbound", metrics.out_utilization_pct),
        ] {
            let Some(util) = value else { continue };
            let Some(severity) = self.severity_for(
                util,
                self.config.utilization_warning_pct,
                self.config.utilization_critical_pct,
            ) else {
                continue;
            };

            found.push(Anomaly {
                kind: AnomalyKind::Threshold,
                metric: metric.to_string(),
                value: util,
                reference: self.config.utilization_warning_pct,
                severity,
                message: format!("{direction} bandwidth utilization at {util:.2}%"),
            });
        }
    }

    /// Trend rule: one-sided inbound growth (surges, not declines)
    fn check_trend(&self, record: &TelemetryRecord, found: &mut Vec<Anomaly>) {
        let Some(growth) = record.metrics.as_ref().and_then(|m| m.in_growth_pct) else {
            return;
        };
        let Some(severity) = self.severity_for(
            growth,
            self.config.growth_warning_pct,
            self.config.growth_critical_pct,
        ) else {
            return;
        };

        found.push(Anomaly {
            kind: AnomalyKind::Trend,
            metric: "in_growth_pct".to_string(),
            value: growth,
            reference: self.config.growth_warning_pct,
            severity,
            message: format!("inbound traffic surged {growth:.2}%"),
        });
    }

    /// Baseline rule: z-score of the inbound rate against the source's
    /// rolling window.
    ///
    /// The z-score is computed against the window as it stood before
    /// this observation; the window is then updated unconditionally, so
    /// every sample feeds the baseline whether or not it fires.
    fn check_baseline(&self, record: &TelemetryRecord, found: &mut Vec<Anomaly>) {
        let Some(rate) = record.metrics.as_ref().and_then(|m| m.in_rate) else {
            return;
        };

        let window = self.config.baseline_window;
        let mut state = self
            .baselines
            .entry(record.source_id.clone())
            .or_insert_with(|| BaselineState::new(window));

        let (mean, std_dev, samples) = (state.mean, state.std_dev, state.len());
        state.observe(rate);

        // Fewer than 2 prior samples or zero variance: insufficient
        // data, rule skipped
        if samples < 2 || std_dev <= 0.0 {
            return;
        }

        let z = ((rate - mean) / std_dev).abs();
        let Some(severity) = self.severity_for(z, self.config.z_warning, self.config.z_critical)
        else {
            return;
        };

        found.push(Anomaly {
            kind: AnomalyKind::Baseline,
            metric: "in_rate".to_string(),
            value: rate,
            reference: mean,
            severity,
            message: format!("inbound rate deviates from baseline (z={z:.2})"),
        });
    }

    /// Hand an anomaly to the alert engine without blocking the worker.
    ///
    /// A full channel drops the signal with a warning; the condition is
    /// re-observed on the next poll cycle.
    fn emit(&self, record: &TelemetryRecord, anomaly: &Anomaly) {
        let Some(tx) = &self.signal_tx else {
            return;
        };

        let signal = AnomalySignal {
            device_id: record.device_id,
            source_id: record.source_id.clone(),
            anomaly: anomaly.clone(),
        };

        if let Err(e) = tx.try_send(signal) {
            warn!(
                source_id = %record.source_id,
                error = %e,
                "Alert channel saturated, anomaly signal dropped"
            );
        }
    }
}

#[async_trait]
impl Stage for AnomalyDetector {
    fn name(&self) -> &str {
        "detect"
    }

    async fn process(&self, mut record: TelemetryRecord) -> Result<Option<TelemetryRecord>> {
        if record.metrics.is_none() {
            warn!(source_id = %record.source_id, "Received record without metrics, passing through");
            return Ok(Some(record));
        }

        // All three families run; no anomaly suppresses another
        let mut found = Vec::new();
        self.check_thresholds(&record, &mut found);
        self.check_trend(&record, &mut found);
        self.check_baseline(&record, &mut found);

        for anomaly in &found {
            self.metrics.inc_anomalies_detected(&anomaly.kind.to_string());
            self.emit(&record, anomaly);
        }

        if !found.is_empty() {
            debug!(
                source_id = %record.source_id,
                count = found.len(),
                "Anomalies detected"
            );
        }
        record.anomalies.extend(found);
        Ok(Some(record))
    }
}
