//! Worker bindings: one execution loop per registered queue.
//!
//! A binding owns two tasks. The poll loop pulls the next eligible job from
//! the engine, runs the handler under a timeout and sends the outcome over an
//! unbounded channel. The outcome task is the single consumer of that channel
//! and applies outcomes to the engine. If the poll loop ends without being
//! asked to stop, the channel closes and the outcome task removes the binding.

use crate::config::WorkerConfig;
use crate::engine::QueueEngine;
use crate::job::{JobId, JobOutcome, JobRecord};
use crate::metrics::{JobMetrics, WorkerMetrics};
use crate::queue::QueueKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::{QueueName, TenantId};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Failure reason recorded for a job whose worker was stopped mid-run.
pub const STOPPED_MID_RUN: &str = "worker stopped before job finished";

/// Context handed to a job handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Queue name within the tenant.
    pub queue: QueueName,
    /// Engine queue the job came from.
    pub engine_queue: String,
    /// Job id.
    pub job_id: JobId,
    /// Dispatch number of this run, starting at 1.
    pub dispatch: u32,
    /// Id of the binding running the job.
    pub worker_id: String,
    /// When the job was dispatched.
    pub started_at: DateTime<Utc>,
}

/// Handler failure.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported an error.
    #[error("{0}")]
    Failed(String),

    /// The handler did not finish in time.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}

/// Executes dispatched jobs. Supplied by the host process.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs one job.
    async fn handle(&self, ctx: JobContext, job: &JobRecord) -> Result<(), HandlerError>;
}

/// Handler that only logs each job.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl JobHandler for LoggingHandler {
    async fn handle(&self, ctx: JobContext, job: &JobRecord) -> Result<(), HandlerError> {
        info!(
            tenant = %ctx.tenant,
            queue = %ctx.queue,
            job_id = %ctx.job_id,
            job_name = %job.name,
            dispatch = ctx.dispatch,
            payload = %job.payload,
            "Processing job"
        );
        Ok(())
    }
}

#[derive(Debug)]
struct OutcomeMessage {
    job_id: JobId,
    job_name: String,
    outcome: JobOutcome,
}

struct WorkerBinding {
    generation: u64,
    worker_id: String,
    engine_queue: String,
    shutdown_tx: broadcast::Sender<()>,
    stopping: Arc<AtomicBool>,
    in_flight: Arc<Mutex<Option<JobId>>>,
    loop_task: JoinHandle<()>,
    outcome_task: JoinHandle<()>,
}

impl WorkerBinding {
    /// Stops the loop, waiting up to `grace` for the in-flight job.
    async fn stop(self, engine: &dyn QueueEngine, grace: Duration) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let mut loop_task = self.loop_task;
        let finished = timeout(grace, &mut loop_task).await.is_ok();
        if !finished {
            warn!(
                worker_id = %self.worker_id,
                engine_queue = %self.engine_queue,
                grace_ms = grace.as_millis() as u64,
                "Worker did not stop in time, aborting"
            );
            loop_task.abort();
            let _ = loop_task.await;
        }

        let _ = self.outcome_task.await;

        if !finished {
            let in_flight = self.in_flight.lock().take();
            if let Some(job_id) = in_flight {
                match engine.fail(&self.engine_queue, &job_id, STOPPED_MID_RUN).await {
                    Ok(_) => warn!(job_id = %job_id, "Marked in-flight job failed"),
                    Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark in-flight job failed"),
                }
            }
        }

        debug!(worker_id = %self.worker_id, "Worker stopped");
    }
}

/// Keeps at most one binding per queue.
pub struct WorkerManager {
    engine: Arc<dyn QueueEngine>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    bindings: Arc<Mutex<HashMap<QueueKey, WorkerBinding>>>,
    generation: AtomicU64,
}

impl WorkerManager {
    /// Creates a manager with no bindings.
    pub fn new(engine: Arc<dyn QueueEngine>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        Self {
            engine,
            handler,
            config,
            bindings: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Starts a binding for a queue. Returns false if one is already running.
    pub fn bind(&self, key: &QueueKey, engine_queue: &str) -> bool {
        let mut bindings = self.bindings.lock();
        if bindings.contains_key(key) {
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let worker_id = format!("{}-{}", engine_queue, Uuid::new_v4());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(Mutex::new(None));

        let poll = PollLoop {
            engine: self.engine.clone(),
            handler: self.handler.clone(),
            key: key.clone(),
            engine_queue: engine_queue.to_string(),
            worker_id: worker_id.clone(),
            poll_interval: self.config.poll_interval(),
            job_timeout: self.config.job_timeout(),
            in_flight: in_flight.clone(),
        };
        let span = info_span!("worker", tenant = %key.tenant, queue = %key.queue, worker_id = %worker_id);
        let loop_task = tokio::spawn(poll.run(outcome_tx, shutdown_rx).instrument(span));

        let outcomes = OutcomeLoop {
            engine: self.engine.clone(),
            bindings: self.bindings.clone(),
            key: key.clone(),
            engine_queue: engine_queue.to_string(),
            generation,
            stopping: stopping.clone(),
        };
        let outcome_task = tokio::spawn(outcomes.run(outcome_rx));

        bindings.insert(
            key.clone(),
            WorkerBinding {
                generation,
                worker_id: worker_id.clone(),
                engine_queue: engine_queue.to_string(),
                shutdown_tx,
                stopping,
                in_flight,
                loop_task,
                outcome_task,
            },
        );
        WorkerMetrics::update_bound(bindings.len());

        info!(key = %key, engine_queue, worker_id = %worker_id, "Worker bound");
        true
    }

    /// Stops and removes a queue's binding. Returns false if there was none.
    pub async fn unbind(&self, key: &QueueKey) -> bool {
        let binding = {
            let mut bindings = self.bindings.lock();
            let binding = bindings.remove(key);
            WorkerMetrics::update_bound(bindings.len());
            binding
        };
        let Some(binding) = binding else {
            return false;
        };

        binding.stop(self.engine.as_ref(), self.config.shutdown_timeout()).await;
        info!(key = %key, "Worker unbound");
        true
    }

    /// Stops every binding.
    pub async fn unbind_all(&self) {
        let bindings: Vec<WorkerBinding> = {
            let mut bindings = self.bindings.lock();
            let drained = bindings.drain().map(|(_, binding)| binding).collect();
            WorkerMetrics::update_bound(0);
            drained
        };

        let grace = self.config.shutdown_timeout();
        let engine = self.engine.as_ref();
        futures::future::join_all(bindings.into_iter().map(|binding| binding.stop(engine, grace))).await;
    }

    /// Returns true if the queue has a running binding.
    pub fn is_bound(&self, key: &QueueKey) -> bool {
        self.bindings.lock().contains_key(key)
    }

    /// Number of running bindings.
    pub fn bound_count(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Keys of every bound queue.
    pub fn bound_keys(&self) -> Vec<QueueKey> {
        let mut keys: Vec<QueueKey> = self.bindings.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

struct PollLoop {
    engine: Arc<dyn QueueEngine>,
    handler: Arc<dyn JobHandler>,
    key: QueueKey,
    engine_queue: String,
    worker_id: String,
    poll_interval: Duration,
    job_timeout: Duration,
    in_flight: Arc<Mutex<Option<JobId>>>,
}

impl PollLoop {
    async fn run(
        self,
        outcome_tx: mpsc::UnboundedSender<OutcomeMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!("Worker loop started");

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
                break;
            }

            match self.engine.fetch_next(&self.engine_queue).await {
                Ok(Some(job)) => {
                    let message = self.execute(job).await;
                    if outcome_tx.send(message).is_err() {
                        break;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to fetch next job"),
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!("Worker loop stopped");
    }

    async fn execute(&self, job: JobRecord) -> OutcomeMessage {
        *self.in_flight.lock() = Some(job.id.clone());
        JobMetrics::job_dispatched(&self.engine_queue, &job.name);

        let ctx = JobContext {
            tenant: self.key.tenant.clone(),
            queue: self.key.queue.clone(),
            engine_queue: self.engine_queue.clone(),
            job_id: job.id.clone(),
            dispatch: job.dispatches,
            worker_id: self.worker_id.clone(),
            started_at: job.processed_at.unwrap_or_else(Utc::now),
        };

        debug!(job_id = %job.id, job_name = %job.name, dispatch = job.dispatches, "Dispatching job");

        let started = Instant::now();
        let result = match timeout(self.job_timeout, self.handler.handle(ctx, &job)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(self.job_timeout)),
        };
        let elapsed = started.elapsed();
        self.in_flight.lock().take();

        let outcome = match result {
            Ok(()) => {
                JobMetrics::job_completed(&self.engine_queue, &job.name, elapsed);
                JobOutcome::Completed
            }
            Err(e) => {
                if matches!(e, HandlerError::Timeout(_)) {
                    JobMetrics::job_timed_out(&self.engine_queue, &job.name);
                }
                JobMetrics::job_failed(&self.engine_queue, &job.name, elapsed);
                warn!(job_id = %job.id, job_name = %job.name, error = %e, "Job execution failed");
                JobOutcome::Failed(e.to_string())
            }
        };

        OutcomeMessage {
            job_id: job.id,
            job_name: job.name,
            outcome,
        }
    }
}

struct OutcomeLoop {
    engine: Arc<dyn QueueEngine>,
    bindings: Arc<Mutex<HashMap<QueueKey, WorkerBinding>>>,
    key: QueueKey,
    engine_queue: String,
    generation: u64,
    stopping: Arc<AtomicBool>,
}

impl OutcomeLoop {
    async fn run(self, mut outcome_rx: mpsc::UnboundedReceiver<OutcomeMessage>) {
        while let Some(message) = outcome_rx.recv().await {
            self.apply(message).await;
        }

        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        let removed = {
            let mut bindings = self.bindings.lock();
            let current = bindings
                .get(&self.key)
                .is_some_and(|binding| binding.generation == self.generation);
            let removed = if current { bindings.remove(&self.key) } else { None };
            WorkerMetrics::update_bound(bindings.len());
            removed
        };

        if removed.is_some() {
            WorkerMetrics::worker_crashed(&self.engine_queue);
            error!(
                key = %self.key,
                engine_queue = %self.engine_queue,
                "Worker loop ended unexpectedly; binding removed, queue stalls until rebound"
            );
        }
    }

    async fn apply(&self, message: OutcomeMessage) {
        let result = match &message.outcome {
            JobOutcome::Completed => self.engine.complete(&self.engine_queue, &message.job_id).await,
            JobOutcome::Failed(reason) => {
                self.engine
                    .fail(&self.engine_queue, &message.job_id, reason)
                    .await
            }
        };

        match result {
            Ok(Some(record)) => debug!(
                job_id = %message.job_id,
                job_name = %message.job_name,
                partition = record.partition.as_str(),
                "Job outcome applied"
            ),
            Ok(None) => warn!(
                job_id = %message.job_id,
                job_name = %message.job_name,
                "Outcome for a job that is gone or no longer active ignored"
            ),
            Err(e) => error!(
                job_id = %message.job_id,
                error = %e,
                "Failed to apply job outcome"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::job::{JobOptions, JobPartition, NewJob};
    use serde_json::Value;

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _ctx: JobContext, _job: &JobRecord) -> Result<(), HandlerError> {
            Err(HandlerError::Failed("boom".to_string()))
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval_ms: 5,
            job_timeout_ms: 1000,
            shutdown_timeout_ms: 1000,
        }
    }

    fn now_job(name: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            payload: Value::Null,
            options: JobOptions::Delay { delay_ms: 0 },
        }
    }

    async fn wait_for_partition(engine: &MemoryEngine, queue: &str, id: &JobId, partition: JobPartition) {
        for _ in 0..200 {
            if let Some(job) = engine.get_job(queue, id).await.unwrap() {
                if job.partition == partition {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {:?}", id, partition);
    }

    #[tokio::test]
    async fn test_bind_is_exclusive_per_queue() {
        let engine = MemoryEngine::default();
        engine.open_queue("t1-alpha").await.unwrap();
        let workers = WorkerManager::new(Arc::new(engine), Arc::new(LoggingHandler), fast_config());
        let key = QueueKey::parse("t1", "alpha").unwrap();

        assert!(workers.bind(&key, "t1-alpha"));
        assert!(!workers.bind(&key, "t1-alpha"));
        assert_eq!(workers.bound_count(), 1);

        assert!(workers.unbind(&key).await);
        assert!(!workers.unbind(&key).await);
        assert!(!workers.is_bound(&key));
    }

    #[tokio::test]
    async fn test_outcomes_reach_engine() {
        let engine = MemoryEngine::default();
        engine.open_queue("t1-alpha").await.unwrap();
        let job = engine.add_job("t1-alpha", now_job("report")).await.unwrap();

        let workers = WorkerManager::new(Arc::new(engine.clone()), Arc::new(LoggingHandler), fast_config());
        let key = QueueKey::parse("t1", "alpha").unwrap();
        workers.bind(&key, "t1-alpha");

        wait_for_partition(&engine, "t1-alpha", &job.id, JobPartition::Completed).await;
        workers.unbind_all().await;
        assert_eq!(workers.bound_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_fails_job() {
        let engine = MemoryEngine::default();
        engine.open_queue("t1-alpha").await.unwrap();
        let job = engine.add_job("t1-alpha", now_job("report")).await.unwrap();

        let workers = WorkerManager::new(Arc::new(engine.clone()), Arc::new(FailingHandler), fast_config());
        workers.bind(&QueueKey::parse("t1", "alpha").unwrap(), "t1-alpha");

        wait_for_partition(&engine, "t1-alpha", &job.id, JobPartition::Failed).await;
        let failed = engine.get_job("t1-alpha", &job.id).await.unwrap().unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
        workers.unbind_all().await;
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::Failed("nope".into()).to_string(), "nope");
        assert!(HandlerError::Timeout(Duration::from_secs(2))
            .to_string()
            .contains("timed out"));
    }
}
