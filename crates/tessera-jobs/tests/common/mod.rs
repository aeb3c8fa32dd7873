//! Shared fixtures for the scheduler integration tests.
//!
//! Everything runs against the in-memory engine and catalog. The wrappers
//! below inject failures; the handlers record what they ran.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::TenantId;
use tessera_jobs::{
    bootstrap, BootstrapReport, CatalogEntry, CatalogStore, HandlerError, JobContext, JobHandler, JobId,
    JobOutcome, JobPartition, JobRecord, JobsConfig, ManualClock, MemoryCatalog, MemoryEngine, NewJob,
    PastRunAtPolicy, QueueEngine, QueueKey, QueueMeta, SchedulerError, SchedulerResult, SchedulerService,
    StoredEntry, WorkerConfig,
};

/// Worker settings short enough for tests.
pub fn fast_config() -> JobsConfig {
    JobsConfig::default().with_worker(WorkerConfig {
        poll_interval_ms: 5,
        job_timeout_ms: 2_000,
        shutdown_timeout_ms: 500,
    })
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Gives bound workers a few poll cycles.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

fn injected(what: &str) -> SchedulerError {
    SchedulerError::EngineUnavailable(format!("injected {} failure", what))
}

// =============================================================================
// Catalog with failure injection
// =============================================================================

#[derive(Debug, Default)]
pub struct CatalogFaults {
    pub fail_add: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_list: AtomicBool,
}

/// In-memory catalog whose operations can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct FlakyCatalog {
    pub inner: MemoryCatalog,
    pub faults: Arc<CatalogFaults>,
}

impl FlakyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_add(&self, fail: bool) {
        self.faults.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.faults.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.faults.fail_list.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for FlakyCatalog {
    async fn add(&self, entry: &CatalogEntry) -> SchedulerResult<()> {
        if self.faults.fail_add.load(Ordering::SeqCst) {
            return Err(injected("catalog add"));
        }
        self.inner.add(entry).await
    }

    async fn remove(&self, key: &QueueKey) -> SchedulerResult<()> {
        if self.faults.fail_remove.load(Ordering::SeqCst) {
            return Err(injected("catalog remove"));
        }
        self.inner.remove(key).await
    }

    async fn get(&self, key: &QueueKey) -> SchedulerResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn list(&self) -> SchedulerResult<Vec<StoredEntry>> {
        if self.faults.fail_list.load(Ordering::SeqCst) {
            return Err(injected("catalog list"));
        }
        self.inner.list().await
    }

    async fn list_tenant(&self, tenant: &TenantId) -> SchedulerResult<Vec<String>> {
        self.inner.list_tenant(tenant).await
    }
}

// =============================================================================
// Engine with failure injection
// =============================================================================

#[derive(Debug, Default)]
pub struct EngineFaults {
    pub fail_purge: AtomicBool,
    pub fail_open: Mutex<HashSet<String>>,
    /// Settles and purges in the order the engine saw them.
    pub journal: Mutex<Vec<String>>,
}

/// In-memory engine whose purge and open can be made to fail.
#[derive(Debug, Clone)]
pub struct FlakyEngine {
    pub inner: MemoryEngine,
    pub faults: Arc<EngineFaults>,
}

impl FlakyEngine {
    pub fn new(inner: MemoryEngine) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// Same stored queues, no open handles, no faults.
    pub fn restarted(&self) -> Self {
        Self::new(self.inner.restarted())
    }

    pub fn fail_purge(&self, fail: bool) {
        self.faults.fail_purge.store(fail, Ordering::SeqCst);
    }

    pub fn fail_open_for(&self, queue: &str) {
        self.faults.fail_open.lock().insert(queue.to_string());
    }

    /// Recorded settles and purges, oldest first.
    pub fn journal(&self) -> Vec<String> {
        self.faults.journal.lock().clone()
    }
}

#[async_trait]
impl QueueEngine for FlakyEngine {
    async fn open_queue(&self, queue: &str) -> SchedulerResult<QueueMeta> {
        if self.faults.fail_open.lock().contains(queue) {
            return Err(injected("engine open"));
        }
        self.inner.open_queue(queue).await
    }

    async fn close_queue(&self, queue: &str) -> SchedulerResult<()> {
        self.inner.close_queue(queue).await
    }

    async fn pause(&self, queue: &str) -> SchedulerResult<()> {
        self.inner.pause(queue).await
    }

    async fn resume(&self, queue: &str) -> SchedulerResult<()> {
        self.inner.resume(queue).await
    }

    async fn purge(&self, queue: &str, partitions: &[JobPartition]) -> SchedulerResult<()> {
        if self.faults.fail_purge.load(Ordering::SeqCst) {
            return Err(injected("engine purge"));
        }
        self.faults.journal.lock().push(format!("purge {}", queue));
        self.inner.purge(queue, partitions).await
    }

    async fn add_job(&self, queue: &str, job: NewJob) -> SchedulerResult<JobRecord> {
        self.inner.add_job(queue, job).await
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.inner.get_job(queue, id).await
    }

    async fn get_jobs(&self, queue: &str, partition: JobPartition) -> SchedulerResult<Vec<JobRecord>> {
        self.inner.get_jobs(queue, partition).await
    }

    async fn update_job(&self, queue: &str, id: &JobId, job: NewJob) -> SchedulerResult<Option<JobRecord>> {
        self.inner.update_job(queue, id, job).await
    }

    async fn remove_job(&self, queue: &str, id: &JobId) -> SchedulerResult<bool> {
        self.inner.remove_job(queue, id).await
    }

    async fn pause_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.inner.pause_job(queue, id).await
    }

    async fn resume_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.inner.resume_job(queue, id).await
    }

    async fn fetch_next(&self, queue: &str) -> SchedulerResult<Option<JobRecord>> {
        self.inner.fetch_next(queue).await
    }

    async fn settle(&self, queue: &str, id: &JobId, outcome: JobOutcome) -> SchedulerResult<Option<JobRecord>> {
        let entry = match &outcome {
            JobOutcome::Completed => format!("settle {} {} completed", queue, id),
            JobOutcome::Failed(reason) => format!("settle {} {} failed: {}", queue, id, reason),
        };
        self.faults.journal.lock().push(entry);
        self.inner.settle(queue, id, outcome).await
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Records every job it runs. Jobs named `panic` make it panic; jobs named
/// `slow` sleep for `slow_for` first.
#[derive(Debug)]
pub struct RecordingHandler {
    runs: Mutex<Vec<(String, JobId, u32)>>,
    slow_for: Duration,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::with_slow_for(Duration::from_secs(5))
    }
}

impl RecordingHandler {
    pub fn with_slow_for(slow_for: Duration) -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            slow_for,
        }
    }

    /// Names of the jobs run so far, in order.
    pub fn names(&self) -> Vec<String> {
        self.runs.lock().iter().map(|(name, _, _)| name.clone()).collect()
    }

    /// Number of runs of a given job id.
    pub fn runs_of(&self, id: &JobId) -> usize {
        self.runs.lock().iter().filter(|(_, run, _)| run == id).count()
    }

    pub fn count(&self) -> usize {
        self.runs.lock().len()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, ctx: JobContext, job: &JobRecord) -> Result<(), HandlerError> {
        match job.name.as_str() {
            "panic" => panic!("handler blew up on job {}", ctx.job_id),
            "slow" => tokio::time::sleep(self.slow_for).await,
            "fail" => {
                self.runs.lock().push((job.name.clone(), ctx.job_id, ctx.dispatch));
                return Err(HandlerError::Failed("requested failure".to_string()));
            }
            _ => {}
        }
        self.runs.lock().push((job.name.clone(), ctx.job_id, ctx.dispatch));
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A service over flaky in-memory collaborators and a manual clock.
pub struct Harness {
    pub clock: ManualClock,
    pub engine: FlakyEngine,
    pub catalog: FlakyCatalog,
    pub handler: Arc<RecordingHandler>,
    pub config: JobsConfig,
    pub service: SchedulerService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(PastRunAtPolicy::Reject, RecordingHandler::default())
    }

    pub fn with(policy: PastRunAtPolicy, handler: RecordingHandler) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap());
        let engine = FlakyEngine::new(MemoryEngine::new(Arc::new(clock.clone())));
        let catalog = FlakyCatalog::new();
        let handler = Arc::new(handler);
        let config = fast_config().with_past_run_at(policy);
        let service = SchedulerService::with_clock(
            Arc::new(engine.clone()),
            Arc::new(catalog.clone()),
            handler.clone(),
            &config,
            Arc::new(clock.clone()),
        );

        Self {
            clock,
            engine,
            catalog,
            handler,
            config,
            service,
        }
    }

    /// Shuts the service down and bootstraps a new one over the same storage.
    pub async fn restart(self) -> (Harness, BootstrapReport) {
        self.service.shutdown().await;
        let engine = self.engine.restarted();

        let (service, report) = bootstrap(
            Arc::new(engine.clone()),
            Arc::new(self.catalog.clone()),
            self.handler.clone(),
            &self.config,
            Arc::new(self.clock.clone()),
        )
        .await
        .expect("bootstrap failed");

        let harness = Harness {
            clock: self.clock,
            engine,
            catalog: self.catalog,
            handler: self.handler,
            config: self.config,
            service,
        };
        (harness, report)
    }

    /// Partition of a job as the engine sees it.
    pub async fn partition(&self, engine_queue: &str, id: &JobId) -> Option<JobPartition> {
        self.engine
            .inner
            .get_job(engine_queue, id)
            .await
            .ok()
            .flatten()
            .map(|job| job.partition)
    }
}

pub fn key(tenant: &str, queue: &str) -> QueueKey {
    QueueKey::parse(tenant, queue).unwrap()
}
