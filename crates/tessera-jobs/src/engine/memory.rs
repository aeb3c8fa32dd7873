//! In-process queue engine.
//!
//! Keeps everything in memory behind one lock and reads time from an
//! injectable [`Clock`], which makes it the simulated engine for tests and
//! the `memory` backend.

use super::QueueEngine;
use crate::clock::{Clock, SystemClock};
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobId, JobOutcome, JobPartition, JobRecord, NewJob};
use crate::queue::QueueMeta;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct StoredQueue {
    created_at: DateTime<Utc>,
    paused: bool,
    next_id: u64,
    jobs: BTreeMap<u64, JobRecord>,
}

impl StoredQueue {
    fn job_mut(&mut self, id: &JobId) -> Option<&mut JobRecord> {
        id.sequence().and_then(|seq| self.jobs.get_mut(&seq))
    }
}

/// Engine that keeps queues in process memory.
///
/// Stored queues survive [`MemoryEngine::restarted`], open handles do not,
/// which is how tests simulate a process restart.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    clock: Arc<dyn Clock>,
    queues: Arc<Mutex<HashMap<String, StoredQueue>>>,
    open: Arc<Mutex<HashSet<String>>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queues: Arc::new(Mutex::new(HashMap::new())),
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// A new engine instance over the same stored queues, with no open handles.
    pub fn restarted(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            queues: self.queues.clone(),
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Names of every stored engine queue, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if a handle for the queue is open.
    pub fn is_open(&self, queue: &str) -> bool {
        self.open.lock().contains(queue)
    }

    /// Returns true if the stored queue is paused.
    pub fn is_paused(&self, queue: &str) -> bool {
        self.queues.lock().get(queue).is_some_and(|q| q.paused)
    }

    /// Number of jobs stored for a queue, across partitions.
    pub fn job_count(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, |q| q.jobs.len())
    }

    fn with_queue<T>(
        &self,
        queue: &str,
        f: impl FnOnce(&mut StoredQueue, DateTime<Utc>) -> SchedulerResult<T>,
    ) -> SchedulerResult<T> {
        let now = self.clock.now();
        let mut queues = self.queues.lock();
        let stored = queues
            .get_mut(queue)
            .ok_or_else(|| SchedulerError::EngineUnavailable(format!("Unknown engine queue '{}'", queue)))?;
        f(stored, now)
    }
}

#[async_trait]
impl QueueEngine for MemoryEngine {
    async fn open_queue(&self, queue: &str) -> SchedulerResult<QueueMeta> {
        let now = self.clock.now();
        let meta = {
            let mut queues = self.queues.lock();
            let stored = queues.entry(queue.to_string()).or_insert_with(|| StoredQueue {
                created_at: now,
                paused: false,
                next_id: 1,
                jobs: BTreeMap::new(),
            });
            QueueMeta {
                created_at: stored.created_at,
                paused: stored.paused,
            }
        };
        self.open.lock().insert(queue.to_string());
        debug!(queue, "Opened engine queue");
        Ok(meta)
    }

    async fn close_queue(&self, queue: &str) -> SchedulerResult<()> {
        self.open.lock().remove(queue);
        debug!(queue, "Closed engine queue");
        Ok(())
    }

    async fn pause(&self, queue: &str) -> SchedulerResult<()> {
        self.with_queue(queue, |q, _| {
            q.paused = true;
            Ok(())
        })
    }

    async fn resume(&self, queue: &str) -> SchedulerResult<()> {
        self.with_queue(queue, |q, _| {
            q.paused = false;
            Ok(())
        })
    }

    async fn purge(&self, queue: &str, partitions: &[JobPartition]) -> SchedulerResult<()> {
        let mut queues = self.queues.lock();
        if JobPartition::ALL.iter().all(|p| partitions.contains(p)) {
            queues.remove(queue);
        } else if let Some(stored) = queues.get_mut(queue) {
            stored.jobs.retain(|_, job| !partitions.contains(&job.partition));
        }
        Ok(())
    }

    async fn add_job(&self, queue: &str, job: NewJob) -> SchedulerResult<JobRecord> {
        self.with_queue(queue, |q, now| {
            let run_at = job.options.first_run(now)?;
            let sequence = q.next_id;
            q.next_id += 1;
            let record = JobRecord::new(JobId::from_sequence(sequence), job, run_at, now);
            q.jobs.insert(sequence, record.clone());
            Ok(record)
        })
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.with_queue(queue, |q, _| Ok(q.job_mut(id).map(|job| job.clone())))
    }

    async fn get_jobs(&self, queue: &str, partition: JobPartition) -> SchedulerResult<Vec<JobRecord>> {
        self.with_queue(queue, |q, _| {
            let mut jobs: Vec<JobRecord> = q
                .jobs
                .values()
                .filter(|job| job.partition == partition)
                .cloned()
                .collect();
            jobs.sort_by_key(|job| (job.score(), job.id.sequence()));
            Ok(jobs)
        })
    }

    async fn update_job(&self, queue: &str, id: &JobId, job: NewJob) -> SchedulerResult<Option<JobRecord>> {
        self.with_queue(queue, |q, now| {
            let Some(record) = q.job_mut(id) else {
                return Ok(None);
            };
            let run_at = job.options.first_run(now)?;
            record.rewrite(job, run_at, now);
            Ok(Some(record.clone()))
        })
    }

    async fn remove_job(&self, queue: &str, id: &JobId) -> SchedulerResult<bool> {
        self.with_queue(queue, |q, _| {
            Ok(id.sequence().and_then(|seq| q.jobs.remove(&seq)).is_some())
        })
    }

    async fn pause_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.with_queue(queue, |q, _| {
            Ok(q.job_mut(id).map(|record| {
                record.pause();
                record.clone()
            }))
        })
    }

    async fn resume_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.with_queue(queue, |q, now| {
            Ok(q.job_mut(id).map(|record| {
                record.resume(now);
                record.clone()
            }))
        })
    }

    async fn fetch_next(&self, queue: &str) -> SchedulerResult<Option<JobRecord>> {
        self.with_queue(queue, |q, now| {
            if q.paused {
                return Ok(None);
            }

            for job in q.jobs.values_mut() {
                if job.partition == JobPartition::Delayed && job.run_at <= now {
                    job.partition = JobPartition::Waiting;
                }
            }

            let next = q
                .jobs
                .iter()
                .filter(|(_, job)| job.partition == JobPartition::Waiting)
                .min_by_key(|(seq, job)| (job.run_at, **seq))
                .map(|(seq, _)| *seq);

            Ok(next.and_then(|seq| q.jobs.get_mut(&seq)).map(|job| {
                job.activate(now);
                job.clone()
            }))
        })
    }

    async fn settle(&self, queue: &str, id: &JobId, outcome: JobOutcome) -> SchedulerResult<Option<JobRecord>> {
        self.with_queue(queue, |q, now| {
            Ok(q.job_mut(id)
                .filter(|record| record.partition == JobPartition::Active)
                .map(|record| {
                    record.settle(&outcome, now);
                    record.clone()
                }))
        })
    }
}
