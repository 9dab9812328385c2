//! Alert store trait and the bundled in-memory backend

use crate::models::{AlertRecord, AlertType, NewAlert};
use crate::storage::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Durable backend for alert records.
///
/// "Open" means `is_handled == false`; the engine maintains at most one
/// open alert per `(device_id, alert_type)`.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert a fresh alert, assigning its id and creation time
    async fn insert(&self, alert: NewAlert) -> Result<AlertRecord, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<AlertRecord>, StoreError>;

    /// The open alert for `(device_id, alert_type)`, if any
    async fn find_open(
        &self,
        device_id: i64,
        alert_type: AlertType,
    ) -> Result<Option<AlertRecord>, StoreError>;

    /// Replace a stored alert by id
    async fn update(&self, alert: AlertRecord) -> Result<(), StoreError>;

    async fn open_alerts(&self) -> Result<Vec<AlertRecord>, StoreError>;

    /// Alerts created in `[start, end)`, for statistics
    async fn created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertRecord>, StoreError>;
}

/// In-memory alert backend used by single-node deployments and tests
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<AlertRecord>>,
    next_id: AtomicI64,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, alert: NewAlert) -> Result<AlertRecord, StoreError> {
        let record = AlertRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            device_id: alert.device_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title,
            message: alert.message,
            value: alert.value,
            threshold: alert.threshold,
            is_read: false,
            read_at: None,
            is_handled: false,
            handled_by: None,
            handled_at: None,
            is_recovered: false,
            recovered_at: None,
            created_at: Utc::now(),
        };
        self.alerts.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<Option<AlertRecord>, StoreError> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn find_open(
        &self,
        device_id: i64,
        alert_type: AlertType,
    ) -> Result<Option<AlertRecord>, StoreError> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.device_id == device_id && a.alert_type == alert_type && !a.is_handled)
            .cloned())
    }

    async fn update(&self, alert: AlertRecord) -> Result<(), StoreError> {
        let mut alerts = self.alerts.lock().unwrap();
        match alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(slot) => {
                *slot = alert;
                Ok(())
            }
            None => Err(StoreError::Backend(format!("alert {} not found", alert.id))),
        }
    }

    async fn open_alerts(&self) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| !a.is_handled)
            .cloned()
            .collect())
    }

    async fn created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.created_at >= start && a.created_at < end)
            .cloned()
            .collect())
    }
}
