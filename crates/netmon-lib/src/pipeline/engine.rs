//! Pipeline composition and execution
//!
//! Stages register by name, pipelines are composed as ordered name
//! lists, and a fixed worker pool drains one shared bounded queue.
//! Back-pressure is explicit: a full queue rejects the submission
//! rather than blocking the producer.

use super::Stage;
use crate::models::TelemetryRecord;
use crate::observability::MonitorMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),
    #[error("pipeline queue is full")]
    Saturated,
    #[error("pipeline engine is shutting down")]
    ShuttingDown,
}

/// Configuration for the pipeline engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks draining the shared queue
    pub workers: usize,
    /// Bounded queue capacity; submissions beyond this are rejected
    pub queue_capacity: usize,
    /// How long shutdown waits for workers to drain before aborting
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 1000,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// One queued unit of work: a record and the resolved stage chain it
/// travels through. Resolution happens at submit time, so recomposing a
/// pipeline never affects records already in flight.
struct Job {
    pipeline: String,
    chain: Arc<Vec<Arc<dyn Stage>>>,
    record: TelemetryRecord,
}

/// Executes named pipelines over a fixed worker pool.
///
/// Lifecycle: register stages and compose pipelines, `start`, `submit`
/// from any number of producers, `shutdown` to drain and stop.
pub struct PipelineEngine {
    config: EngineConfig,
    stages: HashMap<String, Arc<dyn Stage>>,
    pipelines: HashMap<String, Arc<Vec<Arc<dyn Stage>>>>,
    tx: RwLock<Option<mpsc::Sender<Job>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    metrics: MonitorMetrics,
}

impl PipelineEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stages: HashMap::new(),
            pipelines: HashMap::new(),
            tx: RwLock::new(None),
            workers: StdMutex::new(Vec::new()),
            metrics: MonitorMetrics::new(),
        }
    }

    /// Register a stage under its own name, replacing any previous
    /// stage with that name
    pub fn register_stage(&mut self, stage: Arc<dyn Stage>) {
        debug!(stage = %stage.name(), "Stage registered");
        self.stages.insert(stage.name().to_string(), stage);
    }

    /// Compose a named pipeline from previously registered stages
    pub fn compose_pipeline(
        &mut self,
        name: impl Into<String>,
        stage_names: &[&str],
    ) -> Result<(), PipelineError> {
        let mut chain = Vec::with_capacity(stage_names.len());
        for stage_name in stage_names {
            let stage = self
                .stages
                .get(*stage_name)
                .ok_or_else(|| PipelineError::UnknownStage(stage_name.to_string()))?;
            chain.push(Arc::clone(stage));
        }

        let name = name.into();
        info!(pipeline = %name, stages = stage_names.len(), "Pipeline composed");
        self.pipelines.insert(name, Arc::new(chain));
        Ok(())
    }

    /// Spawn the worker pool. Idempotent: a second call while running
    /// is a no-op.
    pub fn start(&self) {
        let mut tx_slot = self.tx.write().unwrap();
        if tx_slot.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel::<Job>(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.config.workers {
            let rx = Arc::clone(&rx);
            let metrics = self.metrics.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, metrics).await;
            }));
        }

        *tx_slot = Some(tx);
        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Pipeline engine started"
        );
    }

    /// Submit a record to a named pipeline.
    ///
    /// Never blocks: a full queue returns `Saturated` and the record is
    /// the caller's to drop or retry.
    pub fn submit(&self, pipeline: &str, record: TelemetryRecord) -> Result<(), PipelineError> {
        let chain = self
            .pipelines
            .get(pipeline)
            .ok_or_else(|| PipelineError::UnknownPipeline(pipeline.to_string()))?;
        let tx_guard = self.tx.read().unwrap();
        let tx = tx_guard.as_ref().ok_or(PipelineError::ShuttingDown)?;

        let job = Job {
            pipeline: pipeline.to_string(),
            chain: Arc::clone(chain),
            record,
        };

        match tx.try_send(job) {
            Ok(()) => {
                self.metrics.inc_queue_depth();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(PipelineError::Saturated),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::ShuttingDown),
        }
    }

    /// Stop accepting work, drain the queue and join the workers.
    ///
    /// Workers still draining after the configured timeout are aborted.
    pub async fn shutdown(&self) {
        // Dropping the sender lets workers drain remaining jobs and
        // then observe channel closure
        let Some(tx) = self.tx.write().unwrap().take() else {
            return;
        };
        drop(tx);

        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        info!("Pipeline engine draining");
        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Pipeline worker panicked"),
                Err(_) => {
                    warn!("Pipeline worker did not drain in time, aborting");
                    abort.abort();
                }
            }
        }
        info!("Pipeline engine stopped");
    }
}

async fn worker_loop(worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, metrics: MonitorMetrics) {
    debug!(worker_id, "Pipeline worker started");
    loop {
        // Lock held only across the recv; processing happens unlocked
        // so workers run jobs concurrently
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            break;
        };
        metrics.dec_queue_depth();
        run_job(worker_id, job, &metrics).await;
    }
    debug!(worker_id, "Pipeline worker stopped");
}

async fn run_job(worker_id: usize, job: Job, metrics: &MonitorMetrics) {
    let mut record = job.record;
    for stage in job.chain.iter() {
        let started = std::time::Instant::now();
        let outcome = stage.process(record).await;
        metrics.observe_stage_latency(stage.name(), started.elapsed().as_secs_f64());

        match outcome {
            Ok(Some(next)) => record = next,
            Ok(None) => {
                // Deliberate abandonment, already logged by the stage
                metrics.inc_records_dropped();
                return;
            }
            Err(e) => {
                error!(
                    worker_id,
                    pipeline = %job.pipeline,
                    stage = %stage.name(),
                    error = %e,
                    "Stage failed, record abandoned"
                );
                metrics.inc_records_dropped();
                return;
            }
        }
    }
    metrics.inc_records_processed();
}
