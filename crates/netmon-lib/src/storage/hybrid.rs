//! Hybrid cache-plus-store facade and lifecycle sweeps

use super::cache::RecentCache;
use super::store::{StoreError, TelemetryStore};
use crate::models::{ArchiveAggregate, StatsRow, TelemetryRow};
use crate::observability::MonitorMetrics;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the hybrid storage tier
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Maximum cached raw points per source
    pub sample_cache_points: usize,
    pub sample_cache_ttl: Duration,
    /// Maximum cached stats points per device
    pub stats_cache_points: usize,
    pub stats_cache_ttl: Duration,
    /// Raw samples older than this are deleted by retention
    pub sample_retention_days: i64,
    /// Derived stats older than this are deleted by retention
    pub stats_retention_hours: i64,
    /// Raw samples older than this are rolled up by archival
    pub archive_after_days: i64,
    pub retention_sweep_interval: std::time::Duration,
    pub archive_sweep_interval: std::time::Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sample_cache_points: 100,
            sample_cache_ttl: Duration::hours(1),
            stats_cache_points: 50,
            stats_cache_ttl: Duration::hours(1),
            sample_retention_days: 90,
            stats_retention_hours: 24,
            archive_after_days: 30,
            retention_sweep_interval: std::time::Duration::from_secs(24 * 3600),
            archive_sweep_interval: std::time::Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Per-device rollup of recent traffic
#[derive(Debug, Clone, Serialize)]
pub struct TrafficSummary {
    pub device_id: i64,
    pub total_in_bytes: i64,
    pub total_out_bytes: i64,
    pub avg_in_rate: f64,
    pub avg_out_rate: f64,
    pub sample_count: u64,
}

/// What one retention sweep removed
#[derive(Debug, Clone, Copy)]
pub struct RetentionReport {
    pub samples_deleted: u64,
    /// `None` when the stats table could not be age-cleaned
    pub stats_deleted: Option<u64>,
}

/// What one archival sweep did
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchivalReport {
    pub groups_archived: u64,
    pub groups_failed: u64,
    pub rows_deleted: u64,
}

/// Two-tier storage: recent points answered from bounded in-memory
/// windows, everything else from the durable store.
///
/// Writes go cache-first so live views keep moving even when the
/// durable tier is down.
pub struct HybridStorage {
    store: Arc<dyn TelemetryStore>,
    samples: RecentCache<TelemetryRow>,
    stats: RecentCache<StatsRow>,
    config: StorageConfig,
    metrics: MonitorMetrics,
}

impl HybridStorage {
    pub fn new(store: Arc<dyn TelemetryStore>, config: StorageConfig) -> Self {
        Self {
            samples: RecentCache::new(config.sample_cache_points, config.sample_cache_ttl),
            stats: RecentCache::new(config.stats_cache_points, config.stats_cache_ttl),
            store,
            config,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Persist one raw sample. The cache write always happens; a
    /// durable-tier failure is returned after it.
    pub async fn save_sample(&self, row: TelemetryRow) -> Result<(), StoreError> {
        self.samples.push(&row.source_id, row.timestamp, row.clone());
        self.store.insert_sample(row).await.inspect_err(|_| {
            self.metrics.inc_store_errors();
        })
    }

    /// Persist one derived-stats row, cache first
    pub async fn save_stats(&self, row: StatsRow) -> Result<(), StoreError> {
        self.stats
            .push(&row.device_id.to_string(), row.timestamp, row.clone());
        self.store.insert_stats(row).await.inspect_err(|_| {
            self.metrics.inc_store_errors();
        })
    }

    /// Raw samples for a source within `window`, cache first.
    ///
    /// A non-empty cached slice is returned as-is; only a cache miss
    /// falls through to the durable store.
    pub async fn recent_samples(
        &self,
        source_id: &str,
        window: Duration,
    ) -> Result<Vec<TelemetryRow>, StoreError> {
        let cutoff = Utc::now() - window;
        let cached = self.samples.recent(source_id, cutoff);
        if !cached.is_empty() {
            debug!(source_id = %source_id, points = cached.len(), "Recent samples served from cache");
            return Ok(cached);
        }
        self.store.samples_since(source_id, cutoff).await
    }

    /// Derived stats for a device within `window`, cache first
    pub async fn recent_stats(
        &self,
        device_id: i64,
        window: Duration,
    ) -> Result<Vec<StatsRow>, StoreError> {
        let cutoff = Utc::now() - window;
        let cached = self.stats.recent(&device_id.to_string(), cutoff);
        if !cached.is_empty() {
            return Ok(cached);
        }
        self.store.stats_since(device_id, cutoff).await
    }

    /// Aggregate a device's traffic since `window` ago from the durable
    /// store
    pub async fn summary(
        &self,
        device_id: i64,
        window: Duration,
    ) -> Result<TrafficSummary, StoreError> {
        let cutoff = Utc::now() - window;
        let rows = self.store.samples_for_device(device_id, cutoff).await?;

        let mut summary = TrafficSummary {
            device_id,
            total_in_bytes: 0,
            total_out_bytes: 0,
            avg_in_rate: 0.0,
            avg_out_rate: 0.0,
            sample_count: rows.len() as u64,
        };
        let mut interval_total: f64 = 0.0;
        for row in &rows {
            summary.total_in_bytes += row.in_bytes;
            summary.total_out_bytes += row.out_bytes;
            interval_total += row.interval_seconds as f64;
        }
        if interval_total > 0.0 {
            summary.avg_in_rate = summary.total_in_bytes as f64 / interval_total;
            summary.avg_out_rate = summary.total_out_bytes as f64 / interval_total;
        }
        Ok(summary)
    }

    /// Delete rows past their retention windows.
    ///
    /// A stats table without a timestamp column skips stats cleanup
    /// only; sample cleanup still runs.
    pub async fn run_retention(&self) -> Result<RetentionReport, StoreError> {
        let sample_cutoff = Utc::now() - Duration::days(self.config.sample_retention_days);
        let samples_deleted = self.store.delete_samples_before(sample_cutoff).await?;
        self.metrics.add_retention_deleted(samples_deleted);

        let stats_cutoff = Utc::now() - Duration::hours(self.config.stats_retention_hours);
        let stats_deleted = match self.store.delete_stats_before(stats_cutoff).await {
            Ok(n) => Some(n),
            Err(StoreError::MissingTimestampColumn { table }) => {
                warn!(table = %table, "Stats table has no timestamp column, skipping stats cleanup");
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(n) = stats_deleted {
            self.metrics.add_retention_deleted(n);
        }

        info!(
            samples_deleted,
            stats_deleted = ?stats_deleted,
            "Retention sweep finished"
        );
        Ok(RetentionReport {
            samples_deleted,
            stats_deleted,
        })
    }

    /// Roll up old raw samples into per-device-per-day aggregates.
    ///
    /// Each group's aggregate is written before its raw rows are
    /// deleted; a failed aggregate write leaves that group's rows in
    /// place for the next sweep.
    pub async fn run_archival(&self) -> Result<ArchivalReport, StoreError> {
        let cutoff = Utc::now() - Duration::days(self.config.archive_after_days);
        let rows = self.store.samples_before(cutoff).await?;

        let mut groups: BTreeMap<(i64, NaiveDate), ArchiveAggregate> = BTreeMap::new();
        for row in rows {
            let day = row.timestamp.date_naive();
            let entry = groups
                .entry((row.device_id, day))
                .or_insert_with(|| ArchiveAggregate {
                    device_id: row.device_id,
                    day,
                    total_in_bytes: 0,
                    total_out_bytes: 0,
                    total_in_packets: 0,
                    total_out_packets: 0,
                    sample_count: 0,
                });
            entry.total_in_bytes += row.in_bytes;
            entry.total_out_bytes += row.out_bytes;
            entry.total_in_packets += row.in_packets;
            entry.total_out_packets += row.out_packets;
            entry.sample_count += 1;
        }

        let mut report = ArchivalReport::default();
        for ((device_id, day), aggregate) in groups {
            let sample_count = aggregate.sample_count;
            if let Err(e) = self.store.insert_archive(aggregate).await {
                error!(
                    device_id,
                    day = %day,
                    error = %e,
                    "Archive write failed, raw rows kept for next sweep"
                );
                self.metrics.inc_store_errors();
                report.groups_failed += 1;
                continue;
            }

            let from = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
            // On the day containing the cutoff the delete must stop at
            // the cutoff too; rows past it were never aggregated
            let to = (from + Duration::days(1)).min(cutoff);
            let deleted = self.store.delete_samples_range(device_id, from, to).await?;
            self.metrics.add_archived_rows(sample_count);
            report.groups_archived += 1;
            report.rows_deleted += deleted;
        }

        info!(
            groups_archived = report.groups_archived,
            groups_failed = report.groups_failed,
            rows_deleted = report.rows_deleted,
            "Archival sweep finished"
        );
        Ok(report)
    }

    /// Spawn the periodic retention and archival sweeps, stopping on
    /// shutdown broadcast
    pub fn spawn_lifecycle(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut retention = tokio::time::interval(self.config.retention_sweep_interval);
            let mut archival = tokio::time::interval(self.config.archive_sweep_interval);
            // Skip the immediate first tick of each interval
            retention.tick().await;
            archival.tick().await;

            info!("Storage lifecycle loop started");
            loop {
                tokio::select! {
                    _ = retention.tick() => {
                        if let Err(e) = self.run_retention().await {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                    _ = archival.tick() => {
                        if let Err(e) = self.run_archival().await {
                            error!(error = %e, "Archival sweep failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Storage lifecycle loop stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArchiveAggregate;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;

    fn row(device_id: i64, source_id: &str, age_days: i64, in_bytes: i64) -> TelemetryRow {
        TelemetryRow {
            device_id,
            source_id: source_id.to_string(),
            timestamp: Utc::now() - Duration::days(age_days),
            in_bytes,
            out_bytes: in_bytes / 2,
            in_packets: 10,
            out_packets: 5,
            interval_seconds: 300,
        }
    }

    fn storage() -> (Arc<MemoryStore>, HybridStorage) {
        let store = Arc::new(MemoryStore::new());
        let hybrid = HybridStorage::new(store.clone(), StorageConfig::default());
        (store, hybrid)
    }

    #[tokio::test]
    async fn test_save_sample_populates_cache_and_store() {
        let (store, hybrid) = storage();
        hybrid.save_sample(row(1, "device-1:eth0", 0, 1_000)).await.unwrap();

        assert_eq!(store.sample_count(), 1);
        let cached = hybrid
            .recent_samples("device-1:eth0", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_to_store() {
        let (store, hybrid) = storage();
        // Row written directly to the store, bypassing the cache
        store
            .insert_sample(row(1, "device-1:eth0", 0, 1_000))
            .await
            .unwrap();

        let rows = hybrid
            .recent_samples("device-1:eth0", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_retention_deletes_expired_rows() {
        let (store, hybrid) = storage();
        store.insert_sample(row(1, "device-1:eth0", 1, 100)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 120, 100)).await.unwrap();

        let report = hybrid.run_retention().await.unwrap();
        assert_eq!(report.samples_deleted, 1);
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_retention_tolerates_legacy_stats_schema() {
        let store = Arc::new(MemoryStore::without_stats_timestamp());
        let hybrid = HybridStorage::new(store.clone(), StorageConfig::default());
        store.insert_sample(row(1, "device-1:eth0", 120, 100)).await.unwrap();

        let report = hybrid.run_retention().await.unwrap();
        assert_eq!(report.samples_deleted, 1);
        assert!(report.stats_deleted.is_none());
    }

    #[tokio::test]
    async fn test_archival_conserves_bytes_and_deletes_rows() {
        let (store, hybrid) = storage();
        // Three old rows on the same device, one recent row untouched
        store.insert_sample(row(1, "device-1:eth0", 40, 100)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 40, 250)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth1", 40, 50)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 1, 999)).await.unwrap();

        let report = hybrid.run_archival().await.unwrap();
        assert_eq!(report.groups_archived, 1);
        assert_eq!(report.rows_deleted, 3);

        let archives = store.archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].total_in_bytes, 400);
        assert_eq!(archives[0].sample_count, 3);
        // Recent row survived
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_archival_spares_same_day_rows_newer_than_cutoff() {
        let (store, hybrid) = storage();
        let cutoff = Utc::now() - Duration::days(StorageConfig::default().archive_after_days);
        // Two rows on the cutoff day, one on each side of the cutoff
        let mut older = row(1, "device-1:eth0", 0, 100);
        older.timestamp = cutoff - Duration::minutes(1);
        let mut newer = row(1, "device-1:eth0", 0, 999);
        newer.timestamp = cutoff + Duration::minutes(1);
        store.insert_sample(older).await.unwrap();
        store.insert_sample(newer).await.unwrap();

        let report = hybrid.run_archival().await.unwrap();
        assert_eq!(report.rows_deleted, 1);

        let archives = store.archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].total_in_bytes, 100);
        // The newer row stays raw until a later sweep aggregates it
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_archival_groups_by_device_and_day() {
        let (store, hybrid) = storage();
        store.insert_sample(row(1, "device-1:eth0", 40, 100)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth0", 41, 100)).await.unwrap();
        store.insert_sample(row(2, "device-2:eth0", 40, 100)).await.unwrap();

        let report = hybrid.run_archival().await.unwrap();
        assert_eq!(report.groups_archived, 3);
    }

    /// Store whose archive writes always fail, for sweep-safety tests
    struct ArchiveFailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl TelemetryStore for ArchiveFailingStore {
        async fn insert_sample(&self, row: TelemetryRow) -> Result<(), StoreError> {
            self.inner.insert_sample(row).await
        }
        async fn insert_stats(&self, row: StatsRow) -> Result<(), StoreError> {
            self.inner.insert_stats(row).await
        }
        async fn samples_since(
            &self,
            source_id: &str,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<TelemetryRow>, StoreError> {
            self.inner.samples_since(source_id, cutoff).await
        }
        async fn samples_for_device(
            &self,
            device_id: i64,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<TelemetryRow>, StoreError> {
            self.inner.samples_for_device(device_id, cutoff).await
        }
        async fn stats_since(
            &self,
            device_id: i64,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<StatsRow>, StoreError> {
            self.inner.stats_since(device_id, cutoff).await
        }
        async fn samples_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<TelemetryRow>, StoreError> {
            self.inner.samples_before(cutoff).await
        }
        async fn delete_samples_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_samples_before(cutoff).await
        }
        async fn delete_samples_range(
            &self,
            device_id: i64,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.inner.delete_samples_range(device_id, from, to).await
        }
        async fn delete_stats_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_stats_before(cutoff).await
        }
        async fn insert_archive(&self, _aggregate: ArchiveAggregate) -> Result<(), StoreError> {
            Err(StoreError::Backend("archive table unavailable".into()))
        }
        async fn archives(&self) -> Result<Vec<ArchiveAggregate>, StoreError> {
            self.inner.archives().await
        }
    }

    #[tokio::test]
    async fn test_failed_archive_write_keeps_raw_rows() {
        let store = Arc::new(ArchiveFailingStore {
            inner: MemoryStore::new(),
        });
        let hybrid = HybridStorage::new(store.clone(), StorageConfig::default());
        store.insert_sample(row(1, "device-1:eth0", 40, 100)).await.unwrap();

        let report = hybrid.run_archival().await.unwrap();
        assert_eq!(report.groups_archived, 0);
        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.rows_deleted, 0);
        assert_eq!(store.inner.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_summary_aggregates_device_traffic() {
        let (store, hybrid) = storage();
        store.insert_sample(row(1, "device-1:eth0", 0, 3_000)).await.unwrap();
        store.insert_sample(row(1, "device-1:eth1", 0, 1_500)).await.unwrap();
        store.insert_sample(row(2, "device-2:eth0", 0, 9_999)).await.unwrap();

        let summary = hybrid.summary(1, Duration::hours(24)).await.unwrap();
        assert_eq!(summary.total_in_bytes, 4_500);
        assert_eq!(summary.sample_count, 2);
        // 4500 bytes over 600 seconds of sampling
        assert!((summary.avg_in_rate - 7.5).abs() < 1e-9);
    }
}
