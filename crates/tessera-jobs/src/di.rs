//! Dependency injection interface for the scheduler.
//!
//! `SchedulerInterface` is the surface the routing layer calls. Arguments are
//! raw strings as they arrive from a request; validation happens here.

use crate::catalog::CatalogStore;
use crate::clock::{Clock, SystemClock};
use crate::config::JobsConfig;
use crate::engine::QueueEngine;
use crate::error::SchedulerResult;
use crate::job::{JobId, JobRecord, JobRequest, JobsByState};
use crate::lifecycle::JobLifecycle;
use crate::manager::QueueManager;
use crate::queue::{QueueHandle, QueueKey};
use crate::registry::QueueRegistry;
use crate::worker::{JobHandler, WorkerManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{Interface, QueueName, TenantId};

/// A queue together with its jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerDetails {
    /// The queue.
    #[serde(flatten)]
    pub queue: QueueHandle,
    /// Its jobs by partition.
    pub jobs: JobsByState,
}

/// Interface for scheduler operations.
#[async_trait]
pub trait SchedulerInterface: Interface + Send + Sync {
    /// Register a new queue for a tenant.
    async fn create_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<QueueHandle>;

    /// Delete a queue and all its jobs.
    async fn delete_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<()>;

    /// Pause a queue.
    async fn pause_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<QueueHandle>;

    /// Resume a queue.
    async fn resume_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<QueueHandle>;

    /// Rename a queue. Existing jobs are not migrated.
    async fn rename_scheduler(
        &self,
        tenant_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> SchedulerResult<QueueHandle>;

    /// List a tenant's queues.
    async fn list_schedulers(&self, tenant_id: &str) -> SchedulerResult<Vec<QueueHandle>>;

    /// Get a queue with its jobs.
    async fn get_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<SchedulerDetails>;

    /// Create a job.
    async fn create_job(&self, tenant_id: &str, queue_name: &str, request: JobRequest) -> SchedulerResult<JobRecord>;

    /// Rewrite a job in place.
    async fn update_job(
        &self,
        tenant_id: &str,
        queue_name: &str,
        job_id: &str,
        request: JobRequest,
    ) -> SchedulerResult<JobRecord>;

    /// Delete a job.
    async fn delete_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<()>;

    /// Pause a job that has not run yet.
    async fn pause_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<JobRecord>;

    /// Resume a paused job.
    async fn resume_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<JobRecord>;

    /// Get a job.
    async fn get_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<JobRecord>;

    /// List a queue's jobs by partition.
    async fn list_jobs(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<JobsByState>;

    /// Restart the worker of a queue whose worker crashed.
    async fn rebind_worker(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<bool>;
}

/// Scheduler service implementation.
pub struct SchedulerService {
    queues: QueueManager,
    jobs: JobLifecycle,
    registry: Arc<QueueRegistry>,
    workers: Arc<WorkerManager>,
}

impl SchedulerService {
    /// Create a service with an empty registry.
    pub fn new(
        engine: Arc<dyn QueueEngine>,
        catalog: Arc<dyn CatalogStore>,
        handler: Arc<dyn JobHandler>,
        config: &JobsConfig,
    ) -> Self {
        Self::with_clock(engine, catalog, handler, config, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock for run-time conversion.
    pub fn with_clock(
        engine: Arc<dyn QueueEngine>,
        catalog: Arc<dyn CatalogStore>,
        handler: Arc<dyn JobHandler>,
        config: &JobsConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(QueueRegistry::new());
        let workers = Arc::new(WorkerManager::new(engine.clone(), handler, config.worker.clone()));

        Self {
            queues: QueueManager::new(engine.clone(), catalog, registry.clone(), workers.clone()),
            jobs: JobLifecycle::new(engine, registry.clone(), clock, config.past_run_at),
            registry,
            workers,
        }
    }

    /// The queue manager.
    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    /// The job lifecycle manager.
    pub fn jobs(&self) -> &JobLifecycle {
        &self.jobs
    }

    /// The registry.
    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// The worker manager.
    pub fn workers(&self) -> &WorkerManager {
        &self.workers
    }

    /// Stop every worker and close every engine handle.
    pub async fn shutdown(&self) {
        self.queues.shutdown().await;
    }
}

#[async_trait]
impl SchedulerInterface for SchedulerService {
    async fn create_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<QueueHandle> {
        self.queues.register(&QueueKey::parse(tenant_id, queue_name)?).await
    }

    async fn delete_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<()> {
        self.queues.delete(&QueueKey::parse(tenant_id, queue_name)?).await
    }

    async fn pause_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<QueueHandle> {
        self.queues.pause(&QueueKey::parse(tenant_id, queue_name)?).await
    }

    async fn resume_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<QueueHandle> {
        self.queues.resume(&QueueKey::parse(tenant_id, queue_name)?).await
    }

    async fn rename_scheduler(
        &self,
        tenant_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> SchedulerResult<QueueHandle> {
        let old_key = QueueKey::parse(tenant_id, old_name)?;
        let new_name = QueueName::parse(new_name)?;
        self.queues.rename(&old_key, new_name).await
    }

    async fn list_schedulers(&self, tenant_id: &str) -> SchedulerResult<Vec<QueueHandle>> {
        self.queues.list(&TenantId::parse(tenant_id)?)
    }

    async fn get_scheduler(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<SchedulerDetails> {
        let queue = self.queues.lookup(&QueueKey::parse(tenant_id, queue_name)?)?;
        let jobs = self.jobs.list_for(&queue).await?;
        Ok(SchedulerDetails { queue, jobs })
    }

    async fn create_job(&self, tenant_id: &str, queue_name: &str, request: JobRequest) -> SchedulerResult<JobRecord> {
        let key = QueueKey::parse(tenant_id, queue_name)?;
        let schedule = request.schedule()?;
        self.jobs
            .create(&key, &request.job_name, request.job_data, &schedule)
            .await
    }

    async fn update_job(
        &self,
        tenant_id: &str,
        queue_name: &str,
        job_id: &str,
        request: JobRequest,
    ) -> SchedulerResult<JobRecord> {
        let key = QueueKey::parse(tenant_id, queue_name)?;
        let schedule = request.schedule()?;
        self.jobs
            .update(&key, &JobId::from(job_id), &request.job_name, request.job_data, &schedule)
            .await
    }

    async fn delete_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<()> {
        let key = QueueKey::parse(tenant_id, queue_name)?;
        self.jobs.delete(&key, &JobId::from(job_id)).await
    }

    async fn pause_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<JobRecord> {
        let key = QueueKey::parse(tenant_id, queue_name)?;
        self.jobs.pause(&key, &JobId::from(job_id)).await
    }

    async fn resume_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<JobRecord> {
        let key = QueueKey::parse(tenant_id, queue_name)?;
        self.jobs.resume(&key, &JobId::from(job_id)).await
    }

    async fn get_job(&self, tenant_id: &str, queue_name: &str, job_id: &str) -> SchedulerResult<JobRecord> {
        let key = QueueKey::parse(tenant_id, queue_name)?;
        self.jobs.get(&key, &JobId::from(job_id)).await
    }

    async fn list_jobs(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<JobsByState> {
        self.jobs.list(&QueueKey::parse(tenant_id, queue_name)?).await
    }

    async fn rebind_worker(&self, tenant_id: &str, queue_name: &str) -> SchedulerResult<bool> {
        self.queues.rebind(&QueueKey::parse(tenant_id, queue_name)?)
    }
}
