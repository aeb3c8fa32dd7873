//! Job definitions and the engine-side job state machine.

use crate::cron::CronSchedule;
use crate::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Engine-assigned job identifier, a per-queue increasing decimal number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates the id for a sequence number.
    pub fn from_sequence(sequence: u64) -> Self {
        Self(sequence.to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number, if the id is one the engine could have assigned.
    ///
    /// Only the canonical decimal form matches: `01`, `+1` and `0001` do not
    /// name job `1`.
    pub fn sequence(&self) -> Option<u64> {
        let sequence: u64 = self.0.parse().ok()?;
        (sequence.to_string() == self.0).then_some(sequence)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Engine partition a job currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPartition {
    /// Due and ready to dispatch.
    Waiting,
    /// Not due yet.
    Delayed,
    /// Dispatched to a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Held back by `pauseJob`.
    Paused,
}

impl JobPartition {
    /// Every partition, the set a full purge covers.
    pub const ALL: [JobPartition; 6] = [
        Self::Waiting,
        Self::Delayed,
        Self::Active,
        Self::Completed,
        Self::Failed,
        Self::Paused,
    ];

    /// Short name, also used as the Redis key suffix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "wait",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Returns true for completed and failed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Partition for a job that is not active, given its run time.
    pub fn placement(run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if run_at <= now {
            Self::Waiting
        } else {
            Self::Delayed
        }
    }
}

/// Lifecycle status reported to callers.
///
/// Collapses the engine's waiting and delayed partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Not yet dispatched.
    Waiting,
    /// Held back by `pauseJob`.
    Paused,
    /// Running.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl From<JobPartition> for JobStatus {
    fn from(partition: JobPartition) -> Self {
        match partition {
            JobPartition::Waiting | JobPartition::Delayed => Self::Waiting,
            JobPartition::Active => Self::Active,
            JobPartition::Completed => Self::Completed,
            JobPartition::Failed => Self::Failed,
            JobPartition::Paused => Self::Paused,
        }
    }
}

/// Engine scheduling options: a delay xor a repeat rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobOptions {
    /// Run once, `delay_ms` after submission.
    Delay { delay_ms: u64 },
    /// Run on every cron fire time, at most `limit` times.
    Repeat { cron: String, limit: Option<u32> },
}

impl JobOptions {
    /// First run time for these options, evaluated at `now`.
    pub fn first_run(&self, now: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        match self {
            Self::Delay { delay_ms } => {
                let delay = i64::try_from(*delay_ms)
                    .ok()
                    .and_then(Duration::try_milliseconds)
                    .ok_or_else(|| {
                        SchedulerError::InvalidSchedule(format!("Delay {}ms is out of range", delay_ms))
                    })?;
                now.checked_add_signed(delay).ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!("Delay {}ms is out of range", delay_ms))
                })
            }
            Self::Repeat { cron, .. } => CronSchedule::parse(cron)?.next_after(now).ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!("Cron expression '{}' never fires again", cron))
            }),
        }
    }
}

/// Caller-facing schedule: a one-time run or a recurring rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Run once at `run_at`.
    OneTime { run_at: DateTime<Utc> },
    /// Run on a cron rule, optionally limited to `limit` runs.
    Recurring { cron: String, limit: Option<u32> },
}

/// A job as submitted to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Job name.
    pub name: String,
    /// Opaque payload.
    pub payload: Value,
    /// Engine scheduling options.
    pub options: JobOptions,
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler returned successfully.
    Completed,
    /// Handler failed or timed out.
    Failed(String),
}

/// A job as stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Engine-assigned id.
    pub id: JobId,
    /// Job name.
    pub name: String,
    /// Opaque payload.
    pub payload: Value,
    /// Scheduling options.
    pub options: JobOptions,
    /// Current engine partition.
    pub partition: JobPartition,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Next due time.
    pub run_at: DateTime<Utc>,
    /// How many times the job has been dispatched.
    #[serde(default)]
    pub dispatches: u32,
    /// Start of the most recent dispatch.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job reached completed or failed.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message of the most recent failed run.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobRecord {
    /// Builds a freshly added record.
    pub fn new(id: JobId, job: NewJob, run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: job.name,
            payload: job.payload,
            options: job.options,
            partition: JobPartition::placement(run_at, now),
            created_at: now,
            run_at,
            dispatches: 0,
            processed_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// Lifecycle status.
    pub fn status(&self) -> JobStatus {
        self.partition.into()
    }

    /// Sort score inside the record's partition (milliseconds).
    pub fn score(&self) -> i64 {
        match self.partition {
            JobPartition::Completed | JobPartition::Failed => {
                self.finished_at.unwrap_or(self.run_at).timestamp_millis()
            }
            JobPartition::Active => self.processed_at.unwrap_or(self.run_at).timestamp_millis(),
            _ => self.run_at.timestamp_millis(),
        }
    }

    /// Replaces name, payload and options in place, keeping the id.
    ///
    /// Active jobs keep running; paused jobs stay paused; everything else
    /// (terminal jobs included) is placed again by the new run time.
    pub fn rewrite(&mut self, job: NewJob, run_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.name = job.name;
        self.payload = job.payload;
        self.options = job.options;

        match self.partition {
            JobPartition::Active => {}
            JobPartition::Paused => self.run_at = run_at,
            _ => {
                if self.partition.is_terminal() {
                    self.dispatches = 0;
                    self.finished_at = None;
                    self.last_error = None;
                }
                self.run_at = run_at;
                self.partition = JobPartition::placement(run_at, now);
            }
        }
    }

    /// Moves the job to active for one dispatch.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.partition = JobPartition::Active;
        self.dispatches = self.dispatches.saturating_add(1);
        self.processed_at = Some(now);
    }

    /// Applies an execution outcome to an active job.
    ///
    /// One-time jobs finish. Recurring jobs are delayed to their next fire
    /// time until the dispatch count reaches the limit.
    pub fn settle(&mut self, outcome: &JobOutcome, now: DateTime<Utc>) {
        if let JobOutcome::Failed(error) = outcome {
            self.last_error = Some(error.clone());
        }

        let next_run = match &self.options {
            JobOptions::Delay { .. } => None,
            JobOptions::Repeat { cron, limit } => {
                if limit.is_some_and(|limit| self.dispatches >= limit) {
                    None
                } else {
                    CronSchedule::parse(cron).ok().and_then(|s| s.next_after(now))
                }
            }
        };

        match next_run {
            Some(run_at) => {
                self.run_at = run_at;
                self.partition = JobPartition::placement(run_at, now);
            }
            None => {
                self.finished_at = Some(now);
                self.partition = match outcome {
                    JobOutcome::Completed => JobPartition::Completed,
                    JobOutcome::Failed(_) => JobPartition::Failed,
                };
            }
        }
    }

    /// Holds back a job that has not been dispatched. Returns false if
    /// there was nothing to pause.
    pub fn pause(&mut self) -> bool {
        match self.partition {
            JobPartition::Waiting | JobPartition::Delayed => {
                self.partition = JobPartition::Paused;
                true
            }
            _ => false,
        }
    }

    /// Releases a paused job. Returns false if it was not paused.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        if self.partition != JobPartition::Paused {
            return false;
        }
        self.partition = JobPartition::placement(self.run_at, now);
        true
    }
}

/// Jobs of one queue grouped by partition.
///
/// Each group is read separately, so the grouping is not an atomic snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsByState {
    /// Due jobs waiting for the worker.
    pub waiting: Vec<JobRecord>,
    /// Jobs whose run time has not come yet.
    pub delayed: Vec<JobRecord>,
    /// Jobs currently running.
    pub active: Vec<JobRecord>,
    /// Jobs that finished successfully.
    pub completed: Vec<JobRecord>,
    /// Jobs that finished with an error.
    pub failed: Vec<JobRecord>,
    /// Jobs held back by a job-level pause.
    pub paused: Vec<JobRecord>,
}

impl JobsByState {
    /// Total number of jobs across all groups.
    pub fn len(&self) -> usize {
        self.waiting.len()
            + self.delayed.len()
            + self.active.len()
            + self.completed.len()
            + self.failed.len()
            + self.paused.len()
    }

    /// Returns true if every group is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw job request as the routing layer receives it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Job name.
    pub job_name: String,
    /// Opaque payload.
    #[serde(default)]
    pub job_data: Value,
    /// Run time of a one-time job.
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    /// Cron rule of a recurring job.
    #[serde(default)]
    pub cron: Option<String>,
    /// Maximum number of runs of a recurring job.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl JobRequest {
    /// One-time request.
    pub fn one_time(name: impl Into<String>, payload: Value, run_at: DateTime<Utc>) -> Self {
        Self {
            job_name: name.into(),
            job_data: payload,
            schedule_time: Some(run_at),
            ..Self::default()
        }
    }

    /// Recurring request.
    pub fn recurring(
        name: impl Into<String>,
        payload: Value,
        cron: impl Into<String>,
        limit: Option<u32>,
    ) -> Self {
        Self {
            job_name: name.into(),
            job_data: payload,
            cron: Some(cron.into()),
            limit,
            ..Self::default()
        }
    }

    /// Exactly one of run time and cron must be present.
    pub fn schedule(&self) -> SchedulerResult<ScheduleSpec> {
        match (&self.schedule_time, &self.cron) {
            (Some(_), Some(_)) => Err(SchedulerError::InvalidSchedule(
                "Specify either scheduleTime or cron, not both".to_string(),
            )),
            (None, None) => Err(SchedulerError::InvalidSchedule(
                "Either scheduleTime or cron is required".to_string(),
            )),
            (Some(run_at), None) => {
                if self.limit.is_some() {
                    return Err(SchedulerError::InvalidSchedule(
                        "limit only applies to cron jobs".to_string(),
                    ));
                }
                Ok(ScheduleSpec::OneTime { run_at: *run_at })
            }
            (None, Some(cron)) => {
                if self.limit == Some(0) {
                    return Err(SchedulerError::InvalidSchedule(
                        "limit must be at least 1".to_string(),
                    ));
                }
                Ok(ScheduleSpec::Recurring {
                    cron: cron.clone(),
                    limit: self.limit,
                })
            }
        }
    }
}
