//! Staged telemetry processing pipeline
//!
//! Raw records from collectors flow through an ordered chain of stages:
//! normalize -> calculate -> detect -> persist. Chains are composed by
//! name and executed by a fixed worker pool draining one shared bounded
//! queue.

mod calculator;
mod detector;
mod engine;
mod normalizer;
mod persister;

#[cfg(test)]
mod tests;

pub use calculator::RateCalculator;
pub use detector::{AnomalyDetector, AnomalySignal, BaselineState, DetectorConfig};
pub use engine::{EngineConfig, PipelineEngine, PipelineError};
pub use normalizer::{Normalizer, NormalizerConfig};
pub use persister::Persister;

use crate::models::TelemetryRecord;
use anyhow::Result;

pub use async_trait::async_trait;

/// One processing stage in a pipeline.
///
/// `Ok(Some(record))` passes the (possibly mutated) record to the next
/// stage. `Ok(None)` abandons the record without error: this is the
/// deliberate lossy path for malformed telemetry. `Err` is logged by
/// the worker and the record is abandoned; it never halts the worker.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name used for registration and pipeline composition
    fn name(&self) -> &str;

    /// Process one record
    async fn process(&self, record: TelemetryRecord) -> Result<Option<TelemetryRecord>>;
}
