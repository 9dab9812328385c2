//! Network telemetry monitor
//!
//! Runs the telemetry pipeline, hybrid storage with its lifecycle
//! sweeps, the alert engine, and the HTTP API for ingest, reads and
//! probes.

use anyhow::Result;
use netmon_lib::alerts::{AlertConfig, AlertEngine, LogNotifier, MemoryAlertStore, StaticDeviceHealth};
use netmon_lib::health::{components, HealthRegistry};
use netmon_lib::observability::MonitorMetrics;
use netmon_lib::pipeline::{
    AnomalyDetector, DetectorConfig, EngineConfig, Normalizer, NormalizerConfig, Persister,
    PipelineEngine, RateCalculator,
};
use netmon_lib::storage::{HybridStorage, MemoryStore, StorageConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting netmon");

    let cfg = config::MonitorConfig::load()?;
    info!(api_port = cfg.api_port, workers = cfg.pipeline_workers, "Monitor configured");

    let _metrics = MonitorMetrics::new();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::STORAGE).await;
    health_registry.register(components::ALERTS).await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Storage tier and its lifecycle sweeps
    let storage = Arc::new(HybridStorage::new(
        Arc::new(MemoryStore::new()),
        StorageConfig {
            sample_retention_days: cfg.sample_retention_days,
            stats_retention_hours: cfg.stats_retention_hours,
            archive_after_days: cfg.archive_after_days,
            retention_sweep_interval: Duration::from_secs(cfg.retention_sweep_secs),
            archive_sweep_interval: Duration::from_secs(cfg.archive_sweep_secs),
            ..Default::default()
        },
    ));
    let lifecycle_handle = storage.clone().spawn_lifecycle(shutdown_tx.subscribe());

    // Alert engine consuming detector signals
    let alerts = Arc::new(AlertEngine::new(
        Arc::new(MemoryAlertStore::new()),
        Arc::new(LogNotifier),
        Arc::new(StaticDeviceHealth::new(true)),
        AlertConfig {
            sweep_interval: Duration::from_secs(cfg.alert_sweep_secs),
            ..Default::default()
        },
    ));
    let (signal_tx, signal_rx) = mpsc::channel(cfg.signal_capacity);
    let consumer_handle = alerts.clone().spawn_consumer(signal_rx, shutdown_tx.subscribe());
    let sweeper_handle = alerts.clone().spawn_sweeper(shutdown_tx.subscribe());

    // Telemetry pipeline
    let engine = {
        let mut engine = PipelineEngine::new(EngineConfig {
            workers: cfg.pipeline_workers,
            queue_capacity: cfg.queue_capacity,
            ..Default::default()
        });
        engine.register_stage(Arc::new(Normalizer::new(NormalizerConfig::default())));
        engine.register_stage(Arc::new(RateCalculator::new()));
        engine.register_stage(Arc::new(
            AnomalyDetector::new(DetectorConfig::default()).with_signal_channel(signal_tx),
        ));
        engine.register_stage(Arc::new(Persister::new(storage.clone())));
        engine.compose_pipeline(
            api::TELEMETRY_PIPELINE,
            &["normalize", "calculate", "detect", "persist"],
        )?;
        engine.start();
        Arc::new(engine)
    };

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        engine: engine.clone(),
        storage,
        alerts,
    });

    health_registry.set_ready(true).await;
    let api_handle = tokio::spawn(api::serve(cfg.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    engine.shutdown().await;

    for handle in [lifecycle_handle, consumer_handle, sweeper_handle] {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
