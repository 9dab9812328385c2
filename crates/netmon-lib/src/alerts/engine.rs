//! Alert lifecycle engine
//!
//! Consumes anomaly signals, deduplicates them into at most one open
//! alert per `(device, type)`, and runs the periodic sweep that
//! escalates stale warnings and recovers offline alerts.

use super::notifier::{DeviceHealth, Notifier};
use super::store::AlertStore;
use crate::models::{AlertRecord, AlertType, NewAlert, Severity};
use crate::observability::MonitorMetrics;
use crate::pipeline::AnomalySignal;
use crate::storage::StoreError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the alert engine
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Open warnings older than this are escalated to critical
    pub escalate_after: Duration,
    /// Cadence of the escalation and recovery sweep
    pub sweep_interval: std::time::Duration,
    /// Offline duration after which a warning alert is raised
    pub offline_warning_after: Duration,
    /// Offline duration after which the alert is critical
    pub offline_critical_after: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            escalate_after: Duration::hours(1),
            sweep_interval: std::time::Duration::from_secs(300),
            offline_warning_after: Duration::minutes(5),
            offline_critical_after: Duration::minutes(30),
        }
    }
}

/// Per-day alert counts
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DailyCounts {
    pub total: u64,
    pub info: u64,
    pub warning: u64,
    pub critical: u64,
}

/// Aggregated alert statistics over a window
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AlertStatistics {
    pub total: u64,
    pub daily: BTreeMap<NaiveDate, DailyCounts>,
    pub by_device: BTreeMap<i64, u64>,
    pub by_type: BTreeMap<String, u64>,
}

/// Owns the full alert lifecycle: creation, refresh, escalation,
/// recovery and operator acknowledgement.
pub struct AlertEngine {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    health: Arc<dyn DeviceHealth>,
    config: AlertConfig,
    metrics: MonitorMetrics,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
        health: Arc<dyn DeviceHealth>,
        config: AlertConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            health,
            config,
            metrics: MonitorMetrics::new(),
        }
    }

    fn title_for(alert_type: AlertType) -> &'static str {
        match alert_type {
            AlertType::TrafficHigh => "High bandwidth utilization",
            AlertType::TrafficSurge => "Traffic surge",
            AlertType::TrafficAnomaly => "Traffic deviates from baseline",
            AlertType::DeviceOffline => "Device offline",
        }
    }

    /// Turn one detection into alert state.
    ///
    /// A signal without a device id has no alert to attach to and is
    /// dropped with a warning.
    pub async fn handle_signal(&self, signal: AnomalySignal) -> Result<(), StoreError> {
        let Some(device_id) = signal.device_id else {
            warn!(source_id = %signal.source_id, "Anomaly signal without device id dropped");
            return Ok(());
        };

        let alert_type = AlertType::from_anomaly(signal.anomaly.kind);
        self.apply_detection(NewAlert {
            device_id,
            alert_type,
            severity: signal.anomaly.severity,
            title: Self::title_for(alert_type).to_string(),
            message: signal.anomaly.message,
            value: signal.anomaly.value,
            threshold: signal.anomaly.reference,
        })
        .await?;
        Ok(())
    }

    /// Deduplicate a detection into the open alert set.
    ///
    /// An existing open alert is refreshed in place; its severity only
    /// ever moves upward. Notifications fire on creation and on
    /// escalation, never on a plain refresh.
    pub async fn apply_detection(&self, candidate: NewAlert) -> Result<AlertRecord, StoreError> {
        if let Some(mut open) = self
            .store
            .find_open(candidate.device_id, candidate.alert_type)
            .await?
        {
            open.value = candidate.value;
            open.message = candidate.message;
            open.created_at = Utc::now();

            let escalated = candidate.severity > open.severity;
            if escalated {
                open.severity = candidate.severity;
            }
            self.store.update(open.clone()).await?;

            if escalated {
                info!(
                    alert_id = open.id,
                    device_id = open.device_id,
                    severity = %open.severity,
                    "Alert escalated"
                );
                self.metrics.inc_alerts_escalated();
                self.notify(&open).await;
            } else {
                debug!(alert_id = open.id, "Open alert refreshed");
            }
            return Ok(open);
        }

        let record = self.store.insert(candidate).await?;
        info!(
            alert_id = record.id,
            device_id = record.device_id,
            alert_type = %record.alert_type,
            severity = %record.severity,
            "Alert created"
        );
        self.metrics.inc_alerts_created();
        self.notify(&record).await;
        Ok(record)
    }

    /// Raise or refresh an offline alert for a device unreachable for
    /// `offline_for`. Durations under the warning threshold do nothing.
    pub async fn record_device_offline(
        &self,
        device_id: i64,
        offline_for: Duration,
    ) -> Result<Option<AlertRecord>, StoreError> {
        let severity = if offline_for >= self.config.offline_critical_after {
            Severity::Critical
        } else if offline_for >= self.config.offline_warning_after {
            Severity::Warning
        } else {
            return Ok(None);
        };

        let minutes = offline_for.num_minutes();
        let record = self
            .apply_detection(NewAlert {
                device_id,
                alert_type: AlertType::DeviceOffline,
                severity,
                title: Self::title_for(AlertType::DeviceOffline).to_string(),
                message: format!("device unreachable for {minutes} minutes"),
                value: minutes as f64,
                threshold: self.config.offline_warning_after.num_minutes() as f64,
            })
            .await?;
        Ok(Some(record))
    }

    /// One escalation-and-recovery pass over the open alert set.
    ///
    /// Idempotent: recovered alerts leave the open set, escalated
    /// alerts are already critical on the next pass.
    pub async fn run_sweep(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        for mut alert in self.store.open_alerts().await? {
            // Recovered alerts wait for operator acknowledgement; the
            // sweep has nothing left to do with them
            if alert.is_recovered {
                continue;
            }
            if alert.alert_type == AlertType::DeviceOffline {
                match self.health.is_healthy(alert.device_id).await {
                    Ok(true) => {
                        self.recover(&mut alert, now).await?;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            device_id = alert.device_id,
                            error = %e,
                            "Health check failed, recovery deferred"
                        );
                    }
                }
            }

            if alert.severity == Severity::Warning
                && now - alert.created_at >= self.config.escalate_after
            {
                alert.severity = Severity::Critical;
                self.store.update(alert.clone()).await?;
                info!(
                    alert_id = alert.id,
                    device_id = alert.device_id,
                    "Stale warning escalated to critical"
                );
                self.metrics.inc_alerts_escalated();
                self.notify(&alert).await;
            }
        }
        Ok(())
    }

    /// Recovery marks the condition healthy again; it does not imply
    /// operator handling, which stays a separate axis. Notifications
    /// are reserved for creation and escalation, so none fires here.
    async fn recover(&self, alert: &mut AlertRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        alert.is_recovered = true;
        alert.recovered_at = Some(now);
        self.store.update(alert.clone()).await?;

        info!(
            alert_id = alert.id,
            device_id = alert.device_id,
            "Alert recovered, device back online"
        );
        self.metrics.inc_alerts_recovered();
        Ok(())
    }

    /// Operator acknowledgement; a handled alert leaves the open set,
    /// so the next detection creates a fresh one
    pub async fn mark_handled(&self, id: i64, user_id: i64) -> Result<AlertRecord, StoreError> {
        let mut alert = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("alert {id} not found")))?;
        alert.is_handled = true;
        alert.handled_by = Some(user_id);
        alert.handled_at = Some(Utc::now());
        self.store.update(alert.clone()).await?;
        Ok(alert)
    }

    pub async fn mark_read(&self, id: i64) -> Result<AlertRecord, StoreError> {
        let mut alert = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("alert {id} not found")))?;
        if !alert.is_read {
            alert.is_read = true;
            alert.read_at = Some(Utc::now());
            self.store.update(alert.clone()).await?;
        }
        Ok(alert)
    }

    /// Aggregate counts for alerts created in `[start, end)`
    pub async fn statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AlertStatistics, StoreError> {
        let mut stats = AlertStatistics::default();
        for alert in self.store.created_between(start, end).await? {
            stats.total += 1;

            let daily = stats.daily.entry(alert.created_at.date_naive()).or_default();
            daily.total += 1;
            match alert.severity {
                Severity::Info => daily.info += 1,
                Severity::Warning => daily.warning += 1,
                Severity::Critical => daily.critical += 1,
            }

            *stats.by_device.entry(alert.device_id).or_default() += 1;
            *stats
                .by_type
                .entry(alert.alert_type.to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn notify(&self, alert: &AlertRecord) {
        if let Err(e) = self.notifier.dispatch(alert).await {
            // Notification is best-effort; alert state is already saved
            error!(alert_id = alert.id, error = %e, "Notification dispatch failed");
        }
    }

    /// Spawn the task draining anomaly signals from the detector
    pub fn spawn_consumer(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<AnomalySignal>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Alert consumer started");
            loop {
                tokio::select! {
                    signal = rx.recv() => {
                        let Some(signal) = signal else { break };
                        if let Err(e) = self.handle_signal(signal).await {
                            error!(error = %e, "Failed to process anomaly signal");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            info!("Alert consumer stopped");
        })
    }

    /// Spawn the periodic escalation and recovery sweep
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.tick().await;

            info!("Alert sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_sweep().await {
                            error!(error = %e, "Alert sweep failed");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            info!("Alert sweeper stopped");
        })
    }
}
