//! Hybrid telemetry storage
//!
//! Two tiers: a bounded in-memory recent cache for dashboard-style
//! reads, and a durable store behind the [`TelemetryStore`] trait.
//! Retention and archival run as periodic background sweeps.

mod cache;
mod hybrid;
mod store;

pub use cache::RecentCache;
pub use hybrid::{ArchivalReport, HybridStorage, RetentionReport, StorageConfig, TrafficSummary};
pub use store::{MemoryStore, StoreError, TelemetryStore};
