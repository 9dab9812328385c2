//! End-to-end pipeline tests
//!
//! Wire the full normalize -> calculate -> detect -> persist chain to
//! real storage and a live alert engine, and drive records through the
//! worker pool the way the binary does.

use crate::alerts::{
    AlertConfig, AlertEngine, AlertStore, MemoryAlertStore, Notifier, StaticDeviceHealth,
};
use crate::models::{AlertRecord, AlertType, Severity, TelemetryRecord};
use crate::pipeline::{
    AnomalyDetector, DetectorConfig, EngineConfig, Normalizer, Persister, PipelineEngine,
    RateCalculator,
};
use crate::storage::{HybridStorage, MemoryStore, StorageConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

struct CountingNotifier {
    dispatched: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn dispatch(&self, _alert: &AlertRecord) -> Result<()> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct Harness {
    engine: PipelineEngine,
    store: Arc<MemoryStore>,
    alert_store: Arc<MemoryAlertStore>,
    notifier: Arc<CountingNotifier>,
    shutdown_tx: broadcast::Sender<()>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(HybridStorage::new(store.clone(), StorageConfig::default()));

    let alert_store = Arc::new(MemoryAlertStore::new());
    let notifier = Arc::new(CountingNotifier {
        dispatched: AtomicUsize::new(0),
    });
    let alerts = Arc::new(AlertEngine::new(
        alert_store.clone(),
        notifier.clone(),
        Arc::new(StaticDeviceHealth::new(false)),
        AlertConfig::default(),
    ));

    let (signal_tx, signal_rx) = mpsc::channel(32);
    let (shutdown_tx, _) = broadcast::channel(1);
    alerts.spawn_consumer(signal_rx, shutdown_tx.subscribe());

    let mut engine = PipelineEngine::new(EngineConfig::default());
    engine.register_stage(Arc::new(Normalizer::default()));
    engine.register_stage(Arc::new(RateCalculator::new()));
    engine.register_stage(Arc::new(
        AnomalyDetector::new(DetectorConfig::default()).with_signal_channel(signal_tx),
    ));
    engine.register_stage(Arc::new(Persister::new(storage)));
    engine
        .compose_pipeline("telemetry", &["normalize", "calculate", "detect", "persist"])
        .unwrap();
    engine.start();

    Harness {
        engine,
        store,
        alert_store,
        notifier,
        shutdown_tx,
    }
}

/// 57000 bytes over 60 s on an 8000 bps link: 950 B/s, 95% inbound
/// utilization
fn hot_record() -> TelemetryRecord {
    let mut record = TelemetryRecord::new("device-1:eth0");
    record.device_id = Some(1);
    record.timestamp = Some("2024-05-01 12:00:00".to_string());
    record.in_bytes = Some(57_000);
    record.out_bytes = Some(600);
    record.interval_seconds = Some(60);
    record.bandwidth_bps = Some(8_000);
    record
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_hot_record_persists_and_raises_critical_alert() {
    let h = harness();

    h.engine.submit("telemetry", hot_record()).unwrap();
    settle().await;

    assert_eq!(h.store.sample_count(), 1);
    assert_eq!(h.store.stats_count(), 1);

    let alert = h
        .alert_store
        .find_open(1, AlertType::TrafficHigh)
        .await
        .unwrap()
        .expect("alert should exist");
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.value, 95.0);
    assert_eq!(h.notifier.dispatched.load(Ordering::Relaxed), 1);

    let _ = h.shutdown_tx.send(());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_repeat_breach_keeps_single_alert_and_dispatch() {
    let h = harness();

    h.engine.submit("telemetry", hot_record()).unwrap();
    settle().await;
    let mut second = hot_record();
    // 57600 bytes -> 96% utilization, same severity
    second.in_bytes = Some(57_600);
    h.engine.submit("telemetry", second).unwrap();
    settle().await;

    assert_eq!(h.alert_store.len(), 1);
    assert_eq!(h.notifier.dispatched.load(Ordering::Relaxed), 1);

    let alert = h
        .alert_store
        .find_open(1, AlertType::TrafficHigh)
        .await
        .unwrap()
        .expect("alert should exist");
    assert_eq!(alert.value, 96.0);

    let _ = h.shutdown_tx.send(());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_malformed_record_dropped_without_side_effects() {
    let h = harness();

    let mut record = hot_record();
    record.timestamp = None;
    h.engine.submit("telemetry", record).unwrap();
    settle().await;

    assert_eq!(h.store.sample_count(), 0);
    assert!(h.alert_store.is_empty());

    let _ = h.shutdown_tx.send(());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_quiet_record_persists_without_alert() {
    let h = harness();

    let mut record = hot_record();
    // 6000 bytes -> 100 B/s -> 10% utilization
    record.in_bytes = Some(6_000);
    h.engine.submit("telemetry", record).unwrap();
    settle().await;

    assert_eq!(h.store.sample_count(), 1);
    assert!(h.alert_store.is_empty());
    assert_eq!(h.notifier.dispatched.load(Ordering::Relaxed), 0);

    let _ = h.shutdown_tx.send(());
    h.engine.shutdown().await;
}
