//! Durable store trait and the bundled in-memory backend

use crate::models::{ArchiveAggregate, StatsRow, TelemetryRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    /// Legacy deployments may carry a `{table}` table without a
    /// timestamp column; age-based cleanup cannot run against it
    #[error("table {table} has no timestamp column")]
    MissingTimestampColumn { table: &'static str },
}

/// Durable backend for telemetry rows, derived stats and archives.
///
/// Deletion methods return the number of rows removed so sweeps can
/// report what they did.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn insert_sample(&self, row: TelemetryRow) -> Result<(), StoreError>;
    async fn insert_stats(&self, row: StatsRow) -> Result<(), StoreError>;

    /// Samples for one source at or after `cutoff`, oldest first
    async fn samples_since(
        &self,
        source_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRow>, StoreError>;

    /// Samples for one device at or after `cutoff`, oldest first
    async fn samples_for_device(
        &self,
        device_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRow>, StoreError>;

    /// Stats rows for one device at or after `cutoff`, oldest first
    async fn stats_since(
        &self,
        device_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatsRow>, StoreError>;

    /// All samples strictly older than `cutoff`, for archival grouping
    async fn samples_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TelemetryRow>, StoreError>;

    async fn delete_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete one device's samples in `[from, to)`
    async fn delete_samples_range(
        &self,
        device_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn delete_stats_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn insert_archive(&self, aggregate: ArchiveAggregate) -> Result<(), StoreError>;

    async fn archives(&self) -> Result<Vec<ArchiveAggregate>, StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    samples: Vec<TelemetryRow>,
    stats: Vec<StatsRow>,
    archives: Vec<ArchiveAggregate>,
}

/// In-memory backend. The default durable tier for single-node
/// deployments and the backend used throughout the test suite.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
    stats_has_timestamp: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            stats_has_timestamp: true,
        }
    }

    /// Simulate a legacy schema whose stats table carries no timestamp
    /// column
    pub fn without_stats_timestamp() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            stats_has_timestamp: false,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.inner.lock().unwrap().samples.len()
    }

    pub fn stats_count(&self) -> usize {
        self.inner.lock().unwrap().stats.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_sample(&self, row: TelemetryRow) -> Result<(), StoreError> {
        self.inner.lock().unwrap().samples.push(row);
        Ok(())
    }

    async fn insert_stats(&self, row: StatsRow) -> Result<(), StoreError> {
        self.inner.lock().unwrap().stats.push(row);
        Ok(())
    }

    async fn samples_since(
        &self,
        source_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .samples
            .iter()
            .filter(|r| r.source_id == source_id && r.timestamp >= cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn samples_for_device(
        &self,
        device_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .samples
            .iter()
            .filter(|r| r.device_id == device_id && r.timestamp >= cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn stats_since(
        &self,
        device_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StatsRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .stats
            .iter()
            .filter(|r| r.device_id == device_id && r.timestamp >= cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn samples_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TelemetryRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .samples
            .iter()
            .filter(|r| r.timestamp < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.samples.len();
        inner.samples.retain(|r| r.timestamp >= cutoff);
        Ok((before - inner.samples.len()) as u64)
    }

    async fn delete_samples_range(
        &self,
        device_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.samples.len();
        inner
            .samples
            .retain(|r| !(r.device_id == device_id && r.timestamp >= from && r.timestamp < to));
        Ok((before - inner.samples.len()) as u64)
    }

    async fn delete_stats_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        if !self.stats_has_timestamp {
            return Err(StoreError::MissingTimestampColumn {
                table: "traffic_stats",
            });
        }
        let mut inner = self.inner.lock().unwrap();
        let before = inner.stats.len();
        inner.stats.retain(|r| r.timestamp >= cutoff);
        Ok((before - inner.stats.len()) as u64)
    }

    async fn insert_archive(&self, aggregate: ArchiveAggregate) -> Result<(), StoreError> {
        self.inner.lock().unwrap().archives.push(aggregate);
        Ok(())
    }

    async fn archives(&self) -> Result<Vec<ArchiveAggregate>, StoreError> {
        Ok(self.inner.lock().unwrap().archives.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(device_id: i64, source_id: &str, age_hours: i64) -> TelemetryRow {
        TelemetryRow {
            device_id,
            source_id: source_id.to_string(),
            timestamp: Utc::now() - Duration::hours(age_hours),
            in_bytes: 1_000,
            out_bytes: 500,
            in_packets: 10,
            out_packets: 5,
            interval_seconds: 300,
        }
    }

    #[tokio::test]
    async fn test_samples_since_filters_by_source_and_age() {
        let store = MemoryStore::new();
        store.insert_sample(row(1, "device-1:eth0", 1)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 48)).await.unwrap();
        store.insert_sample(row(2, "device-2:eth0", 1)).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(24);
        let rows = store.samples_since("device-1:eth0", cutoff).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_samples_before_reports_count() {
        let store = MemoryStore::new();
        store.insert_sample(row(1, "device-1:eth0", 1)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 100)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 200)).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(50);
        let deleted = store.delete_samples_before(cutoff).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_samples_range_scoped_to_device() {
        let store = MemoryStore::new();
        store.insert_sample(row(1, "device-1:eth0", 10)).await.unwrap();
        store.insert_sample(row(2, "device-2:eth0", 10)).await.unwrap();

        let from = Utc::now() - Duration::hours(24);
        let deleted = store.delete_samples_range(1, from, Utc::now()).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_legacy_stats_schema_rejects_age_cleanup() {
        let store = MemoryStore::without_stats_timestamp();
        let result = store.delete_stats_before(Utc::now()).await;
        assert!(matches!(
            result,
            Err(StoreError::MissingTimestampColumn { table: "traffic_stats" })
        ));
    }
}
