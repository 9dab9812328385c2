//! Notification dispatch and device health lookup

use crate::models::AlertRecord;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Delivers alert notifications to operators.
///
/// Dispatch failures are the caller's to log; they never roll back the
/// alert state change that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, alert: &AlertRecord) -> Result<()>;
}

/// Notifier that writes structured log lines, the default sink when no
/// external channel is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, alert: &AlertRecord) -> Result<()> {
        info!(
            alert_id = alert.id,
            device_id = alert.device_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            title = %alert.title,
            "Alert notification"
        );
        Ok(())
    }
}

/// Answers whether a device is currently reachable, used by the
/// recovery sweep
#[async_trait]
pub trait DeviceHealth: Send + Sync {
    async fn is_healthy(&self, device_id: i64) -> Result<bool>;
}

/// Fixed health answer, settable at runtime
pub struct StaticDeviceHealth {
    healthy: AtomicBool,
}

impl StaticDeviceHealth {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[async_trait]
impl DeviceHealth for StaticDeviceHealth {
    async fn is_healthy(&self, _device_id: i64) -> Result<bool> {
        Ok(self.healthy.load(Ordering::Relaxed))
    }
}
