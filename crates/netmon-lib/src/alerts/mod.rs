//! Alert lifecycle
//!
//! Anomaly signals from the pipeline become durable alerts with
//! deduplication, refresh, escalation and recovery semantics. A
//! periodic sweep ages warnings into criticals and recovers offline
//! alerts for devices that came back.

mod engine;
mod notifier;
mod store;

pub use engine::{AlertConfig, AlertEngine, AlertStatistics, DailyCounts};
pub use notifier::{DeviceHealth, LogNotifier, Notifier, StaticDeviceHealth};
pub use store::{AlertStore, MemoryAlertStore};
