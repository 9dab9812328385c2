//! Core library for the network telemetry monitor
//!
//! Three subsystems:
//! - [`pipeline`]: staged processing of raw telemetry records over a
//!   fixed worker pool
//! - [`storage`]: hybrid recent-cache plus durable store, with
//!   retention and archival sweeps
//! - [`alerts`]: alert lifecycle with deduplication, escalation and
//!   recovery

pub mod alerts;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod storage;

pub use alerts::{AlertConfig, AlertEngine};
pub use models::{AlertRecord, Anomaly, Severity, TelemetryRecord};
pub use pipeline::{EngineConfig, PipelineEngine, Stage};
pub use storage::{HybridStorage, StorageConfig};
