//! Queue engine contract.
//!
//! The engine is the execution substrate: it stores jobs per engine queue,
//! orders them, moves them between partitions and owns recurring repetition.
//! The scheduler core only talks to it through [`QueueEngine`].

mod memory;
pub mod redis;

pub use memory::MemoryEngine;
pub use self::redis::RedisEngine;

use crate::cron::CronSchedule;
use crate::error::SchedulerResult;
use crate::job::{JobId, JobOutcome, JobPartition, JobRecord, NewJob};
use crate::queue::QueueMeta;
use async_trait::async_trait;

/// Operations the scheduler core needs from an execution engine.
///
/// Every queue argument is an engine queue name. Methods that address a
/// single job return `None` (or `false`) when the job does not exist.
#[async_trait]
pub trait QueueEngine: Send + Sync {
    /// Opens an engine queue, creating it if it does not exist yet.
    async fn open_queue(&self, queue: &str) -> SchedulerResult<QueueMeta>;

    /// Releases the handle. Idempotent; stored jobs are kept.
    async fn close_queue(&self, queue: &str) -> SchedulerResult<()>;

    /// Stops dispatching waiting jobs.
    async fn pause(&self, queue: &str) -> SchedulerResult<()>;

    /// Resumes dispatching.
    async fn resume(&self, queue: &str) -> SchedulerResult<()>;

    /// Removes every job in the given partitions. Idempotent. Purging every
    /// partition also drops the queue metadata.
    async fn purge(&self, queue: &str, partitions: &[JobPartition]) -> SchedulerResult<()>;

    /// Adds a job and returns the stored record.
    async fn add_job(&self, queue: &str, job: NewJob) -> SchedulerResult<JobRecord>;

    /// Fetches one job.
    async fn get_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>>;

    /// Lists the jobs in one partition.
    async fn get_jobs(&self, queue: &str, partition: JobPartition) -> SchedulerResult<Vec<JobRecord>>;

    /// Rewrites a job in place, keeping its id.
    async fn update_job(&self, queue: &str, id: &JobId, job: NewJob) -> SchedulerResult<Option<JobRecord>>;

    /// Deletes a job from whatever partition it is in.
    async fn remove_job(&self, queue: &str, id: &JobId) -> SchedulerResult<bool>;

    /// Holds back a waiting or delayed job.
    async fn pause_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>>;

    /// Releases a paused job.
    async fn resume_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>>;

    /// Promotes due delayed jobs, then atomically moves the next waiting job
    /// to active. `None` when the queue is paused or nothing is due.
    async fn fetch_next(&self, queue: &str) -> SchedulerResult<Option<JobRecord>>;

    /// Applies an execution outcome to an active job. `None` if the job is
    /// gone or no longer active.
    async fn settle(&self, queue: &str, id: &JobId, outcome: JobOutcome) -> SchedulerResult<Option<JobRecord>>;

    /// Marks an active job completed (or schedules its next repetition).
    async fn complete(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.settle(queue, id, JobOutcome::Completed).await
    }

    /// Marks an active job failed (or schedules its next repetition).
    async fn fail(&self, queue: &str, id: &JobId, error: &str) -> SchedulerResult<Option<JobRecord>> {
        self.settle(queue, id, JobOutcome::Failed(error.to_string())).await
    }

    /// Validates cron syntax the way the engine will interpret it.
    fn validate_cron(&self, expression: &str) -> SchedulerResult<()> {
        CronSchedule::parse(expression).map(|_| ())
    }
}
