//! Monitor configuration

use anyhow::Result;
use serde::Deserialize;

/// Monitor configuration, loaded from NETMON_-prefixed environment
/// variables with built-in defaults
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// API server port for health/metrics/ingest
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Pipeline worker count
    #[serde(default = "default_pipeline_workers")]
    pub pipeline_workers: usize,

    /// Pipeline queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Anomaly signal channel capacity
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,

    /// Raw sample retention in days
    #[serde(default = "default_sample_retention_days")]
    pub sample_retention_days: i64,

    /// Derived stats retention in hours
    #[serde(default = "default_stats_retention_hours")]
    pub stats_retention_hours: i64,

    /// Age in days after which raw samples are archived
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,

    /// Retention sweep cadence in seconds
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,

    /// Archival sweep cadence in seconds
    #[serde(default = "default_archive_sweep_secs")]
    pub archive_sweep_secs: u64,

    /// Alert escalation/recovery sweep cadence in seconds
    #[serde(default = "default_alert_sweep_secs")]
    pub alert_sweep_secs: u64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_pipeline_workers() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_signal_capacity() -> usize {
    256
}

fn default_sample_retention_days() -> i64 {
    90
}

fn default_stats_retention_hours() -> i64 {
    24
}

fn default_archive_after_days() -> i64 {
    30
}

fn default_retention_sweep_secs() -> u64 {
    24 * 3600
}

fn default_archive_sweep_secs() -> u64 {
    7 * 24 * 3600
}

fn default_alert_sweep_secs() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            pipeline_workers: default_pipeline_workers(),
            queue_capacity: default_queue_capacity(),
            signal_capacity: default_signal_capacity(),
            sample_retention_days: default_sample_retention_days(),
            stats_retention_hours: default_stats_retention_hours(),
            archive_after_days: default_archive_after_days(),
            retention_sweep_secs: default_retention_sweep_secs(),
            archive_sweep_secs: default_archive_sweep_secs(),
            alert_sweep_secs: default_alert_sweep_secs(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("NETMON"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.pipeline_workers, 3);
        assert_eq!(config.sample_retention_days, 90);
        assert_eq!(config.archive_after_days, 30);
    }
}
