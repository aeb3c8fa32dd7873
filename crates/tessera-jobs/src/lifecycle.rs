//! Job lifecycle: validates job requests and translates them into engine
//! scheduling options.

use crate::clock::Clock;
use crate::config::PastRunAtPolicy;
use crate::engine::QueueEngine;
use crate::error::{NotFoundKind, SchedulerError, SchedulerResult};
use crate::job::{JobId, JobOptions, JobPartition, JobRecord, JobsByState, NewJob, ScheduleSpec};
use crate::metrics::JobMetrics;
use crate::queue::{QueueHandle, QueueKey};
use crate::registry::QueueRegistry;
use serde_json::Value;
use std::sync::Arc;
use tessera_core::validation::rules;
use tracing::{debug, info};

/// Job CRUD over registered queues.
pub struct JobLifecycle {
    engine: Arc<dyn QueueEngine>,
    registry: Arc<QueueRegistry>,
    clock: Arc<dyn Clock>,
    past_run_at: PastRunAtPolicy,
}

impl JobLifecycle {
    /// Creates a lifecycle manager.
    pub fn new(
        engine: Arc<dyn QueueEngine>,
        registry: Arc<QueueRegistry>,
        clock: Arc<dyn Clock>,
        past_run_at: PastRunAtPolicy,
    ) -> Self {
        Self {
            engine,
            registry,
            clock,
            past_run_at,
        }
    }

    /// Engine options for a schedule.
    ///
    /// A one-time run becomes a delay from now; a run time in the past is
    /// rejected or clamped to zero per the configured policy.
    pub fn options(&self, schedule: &ScheduleSpec) -> SchedulerResult<JobOptions> {
        match schedule {
            ScheduleSpec::OneTime { run_at } => {
                let delay_ms = (*run_at - self.clock.now()).num_milliseconds();
                let delay_ms = match (u64::try_from(delay_ms), self.past_run_at) {
                    (Ok(delay_ms), _) => delay_ms,
                    (Err(_), PastRunAtPolicy::Clamp) => 0,
                    (Err(_), PastRunAtPolicy::Reject) => {
                        return Err(SchedulerError::InvalidSchedule(format!(
                            "Run time {} is in the past",
                            run_at
                        )));
                    }
                };
                Ok(JobOptions::Delay { delay_ms })
            }
            ScheduleSpec::Recurring { cron, limit } => {
                self.engine.validate_cron(cron)?;
                if *limit == Some(0) {
                    return Err(SchedulerError::InvalidSchedule(
                        "limit must be at least 1".to_string(),
                    ));
                }
                Ok(JobOptions::Repeat {
                    cron: cron.clone(),
                    limit: *limit,
                })
            }
        }
    }

    fn new_job(&self, name: &str, payload: Value, schedule: &ScheduleSpec) -> SchedulerResult<NewJob> {
        rules::not_blank(name)
            .map_err(|reason| SchedulerError::InvalidArgument(format!("invalid job name '{}': {}", name, reason)))?;
        Ok(NewJob {
            name: name.to_string(),
            payload,
            options: self.options(schedule)?,
        })
    }

    /// Adds a job to a queue.
    pub async fn create(
        &self,
        key: &QueueKey,
        name: &str,
        payload: Value,
        schedule: &ScheduleSpec,
    ) -> SchedulerResult<JobRecord> {
        let handle = self.registry.get(key)?;
        let job = self.new_job(name, payload, schedule)?;
        let recurring = matches!(job.options, JobOptions::Repeat { .. });

        let record = self.engine.add_job(&handle.engine_name, job).await?;
        JobMetrics::job_created(&handle.engine_name, recurring);
        info!(key = %key, job_id = %record.id, job_name = %record.name, run_at = %record.run_at, "Job created");
        Ok(record)
    }

    /// Rewrites a job in place.
    pub async fn update(
        &self,
        key: &QueueKey,
        id: &JobId,
        name: &str,
        payload: Value,
        schedule: &ScheduleSpec,
    ) -> SchedulerResult<JobRecord> {
        let handle = self.registry.get(key)?;
        let job = self.new_job(name, payload, schedule)?;

        let record = self
            .engine
            .update_job(&handle.engine_name, id, job)
            .await?
            .ok_or_else(|| job_not_found(id))?;
        info!(key = %key, job_id = %id, partition = record.partition.as_str(), "Job updated");
        Ok(record)
    }

    /// Deletes a job.
    pub async fn delete(&self, key: &QueueKey, id: &JobId) -> SchedulerResult<()> {
        let handle = self.registry.get(key)?;
        if !self.engine.remove_job(&handle.engine_name, id).await? {
            return Err(job_not_found(id));
        }
        info!(key = %key, job_id = %id, "Job deleted");
        Ok(())
    }

    /// Holds back a job that has not been dispatched yet.
    pub async fn pause(&self, key: &QueueKey, id: &JobId) -> SchedulerResult<JobRecord> {
        let handle = self.registry.get(key)?;
        let record = self
            .engine
            .pause_job(&handle.engine_name, id)
            .await?
            .ok_or_else(|| job_not_found(id))?;
        debug!(key = %key, job_id = %id, partition = record.partition.as_str(), "Job pause requested");
        Ok(record)
    }

    /// Releases a paused job.
    pub async fn resume(&self, key: &QueueKey, id: &JobId) -> SchedulerResult<JobRecord> {
        let handle = self.registry.get(key)?;
        let record = self
            .engine
            .resume_job(&handle.engine_name, id)
            .await?
            .ok_or_else(|| job_not_found(id))?;
        debug!(key = %key, job_id = %id, partition = record.partition.as_str(), "Job resume requested");
        Ok(record)
    }

    /// Fetches one job.
    pub async fn get(&self, key: &QueueKey, id: &JobId) -> SchedulerResult<JobRecord> {
        let handle = self.registry.get(key)?;
        self.engine
            .get_job(&handle.engine_name, id)
            .await?
            .ok_or_else(|| job_not_found(id))
    }

    /// Lists a queue's jobs by partition.
    pub async fn list(&self, key: &QueueKey) -> SchedulerResult<JobsByState> {
        let handle = self.registry.get(key)?;
        self.list_for(&handle).await
    }

    /// Lists jobs of a queue handle already looked up.
    ///
    /// Each partition is a separate engine read; the result is not a snapshot.
    pub async fn list_for(&self, handle: &QueueHandle) -> SchedulerResult<JobsByState> {
        let queue = handle.engine_name.as_str();
        let (waiting, delayed, active, completed, failed, paused) = futures::try_join!(
            self.engine.get_jobs(queue, JobPartition::Waiting),
            self.engine.get_jobs(queue, JobPartition::Delayed),
            self.engine.get_jobs(queue, JobPartition::Active),
            self.engine.get_jobs(queue, JobPartition::Completed),
            self.engine.get_jobs(queue, JobPartition::Failed),
            self.engine.get_jobs(queue, JobPartition::Paused),
        )?;

        Ok(JobsByState {
            waiting,
            delayed,
            active,
            completed,
            failed,
            paused,
        })
    }
}

fn job_not_found(id: &JobId) -> SchedulerError {
    SchedulerError::not_found(NotFoundKind::Job, id)
}
