//! Redis-backed queue engine.
//!
//! Key layout per engine queue `q` under prefix `p`:
//!
//! | key | type | contents |
//! |---|---|---|
//! | `p:q:meta` | hash | `created_at` (ms), `paused` (0/1) |
//! | `p:q:id` | string | job id counter |
//! | `p:q:job:{id}` | string | JSON [`JobRecord`] |
//! | `p:q:{wait,delayed,active,completed,failed,paused}` | zset | job ids |
//!
//! The sorted sets are authoritative for partition membership; the
//! `partition` field inside a record can lag behind when `fetch_next`
//! promotes a delayed job to `wait`.
//!
//! Every change to a single job is an optimistic transaction: the job key is
//! `WATCH`ed, the record read and the new record plus its set moves written
//! in one `MULTI`. Each of those transactions rewrites the job key, so two
//! writers racing on the same job cannot both commit; the loser re-reads and
//! decides again.

use super::QueueEngine;
use crate::clock::{Clock, SystemClock};
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobId, JobOutcome, JobPartition, JobRecord, NewJob};
use crate::queue::QueueMeta;
use async_trait::async_trait;
use chrono::DateTime;
use deadpool_redis::{Connection, Pool};
use parking_lot::Mutex;
use redis::{AsyncCommands, Pipeline, Script};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts per optimistic transaction before giving up.
const MAX_TX_ATTEMPTS: usize = 16;

/// Promotes due delayed jobs and returns the oldest waiting id without
/// taking it. The caller claims it in a transaction.
///
/// KEYS: meta, delayed, wait. ARGV: now (ms).
const PROMOTE_AND_PEEK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'paused') == '1' then
    return false
end
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'WITHSCORES')
for i = 1, #due, 2 do
    redis.call('ZREM', KEYS[2], due[i])
    redis.call('ZADD', KEYS[3], due[i + 1], due[i])
end
local head = redis.call('ZRANGE', KEYS[3], 0, 0)
if head[1] == nil then
    return false
end
return head[1]
"#;

/// Redis key builder for engine queues.
#[derive(Debug, Clone)]
pub struct EngineKeys {
    prefix: String,
}

impl EngineKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Queue metadata hash.
    pub fn meta(&self, queue: &str) -> String {
        format!("{}:{}:meta", self.prefix, queue)
    }

    /// Job id counter.
    pub fn id_counter(&self, queue: &str) -> String {
        format!("{}:{}:id", self.prefix, queue)
    }

    /// Job record.
    pub fn job(&self, queue: &str, id: &str) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, id)
    }

    /// Partition sorted set.
    pub fn partition(&self, queue: &str, partition: JobPartition) -> String {
        format!("{}:{}:{}", self.prefix, queue, partition.as_str())
    }
}

/// Sets a job may be found in, given the partition its record claims.
fn source_sets(partition: JobPartition) -> &'static [JobPartition] {
    match partition {
        JobPartition::Waiting | JobPartition::Delayed => &[JobPartition::Waiting, JobPartition::Delayed],
        JobPartition::Active => &[JobPartition::Active],
        JobPartition::Completed => &[JobPartition::Completed],
        JobPartition::Failed => &[JobPartition::Failed],
        JobPartition::Paused => &[JobPartition::Paused],
    }
}

/// What a job transaction decided after reading the current record.
enum Step<T> {
    /// Nothing to write; release the watch and return.
    Skip(T),
    /// Run these commands in `MULTI`/`EXEC`, then return.
    Commit(Pipeline, T),
}

fn contended(what: &str, queue: &str) -> SchedulerError {
    SchedulerError::EngineUnavailable(format!(
        "{} in engine queue '{}' kept changing, gave up after {} attempts",
        what, queue, MAX_TX_ATTEMPTS
    ))
}

/// Redis-backed queue engine.
pub struct RedisEngine {
    pool: Pool,
    keys: EngineKeys,
    clock: Arc<dyn Clock>,
    peek_script: Script,
    open: Mutex<HashSet<String>>,
}

impl RedisEngine {
    /// Create a new Redis engine.
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self::with_clock(pool, key_prefix, Arc::new(SystemClock))
    }

    /// Create a new Redis engine with an explicit clock.
    pub fn with_clock(pool: Pool, key_prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            keys: EngineKeys::new(key_prefix),
            clock,
            peek_script: Script::new(PROMOTE_AND_PEEK_SCRIPT),
            open: Mutex::new(HashSet::new()),
        }
    }

    /// Names of the queues this instance has open handles for.
    pub fn open_queues(&self) -> Vec<String> {
        self.open.lock().iter().cloned().collect()
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> SchedulerResult<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Reads a record, reporting it as waiting when its id sits in `wait`.
    async fn read(&self, conn: &mut Connection, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        let (json, waiting_score): (Option<String>, Option<f64>) = redis::pipe()
            .get(self.keys.job(queue, id.as_str()))
            .zscore(self.keys.partition(queue, JobPartition::Waiting), id.as_str())
            .query_async(&mut **conn)
            .await?;

        let Some(json) = json else {
            return Ok(None);
        };
        let mut record: JobRecord = serde_json::from_str(&json)?;
        if waiting_score.is_some() {
            record.partition = JobPartition::Waiting;
        }
        Ok(Some(record))
    }

    /// Commands writing the record and moving its id from `from` to its
    /// current partition.
    fn store(&self, queue: &str, record: &JobRecord, from: JobPartition) -> SchedulerResult<Pipeline> {
        let json = serde_json::to_string(record)?;
        let id = record.id.as_str();

        let mut pipe = redis::pipe();
        pipe.set(self.keys.job(queue, id), json).ignore();
        for partition in source_sets(from) {
            pipe.zrem(self.keys.partition(queue, *partition), id).ignore();
        }
        pipe.zadd(self.keys.partition(queue, record.partition), id, record.score())
            .ignore();
        Ok(pipe)
    }

    /// Runs an optimistic read-modify-write of one job.
    ///
    /// `decide` sees the current record and may be called again if another
    /// writer commits to the job between the read and `EXEC`.
    async fn transact<T, F>(&self, queue: &str, id: &JobId, mut decide: F) -> SchedulerResult<T>
    where
        T: Send,
        F: FnMut(Option<JobRecord>) -> SchedulerResult<Step<T>> + Send,
    {
        let mut conn = self.conn().await?;
        let job_key = self.keys.job(queue, id.as_str());

        for _ in 0..MAX_TX_ATTEMPTS {
            let _: () = redis::cmd("WATCH").arg(&job_key).query_async(&mut *conn).await?;
            let current = match self.read(&mut conn, queue, id).await {
                Ok(current) => current,
                Err(e) => {
                    let _: Result<(), _> = redis::cmd("UNWATCH").query_async(&mut *conn).await;
                    return Err(e);
                }
            };

            match decide(current) {
                Ok(Step::Skip(value)) => {
                    let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
                    return Ok(value);
                }
                Ok(Step::Commit(mut pipe, value)) => {
                    let committed: Option<()> = pipe.atomic().query_async(&mut *conn).await?;
                    if committed.is_some() {
                        return Ok(value);
                    }
                    debug!(queue, job_id = %id, "Job changed during transaction, retrying");
                }
                Err(e) => {
                    let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
                    return Err(e);
                }
            }
        }

        Err(contended(&format!("Job {}", id), queue))
    }
}

#[async_trait]
impl QueueEngine for RedisEngine {
    async fn open_queue(&self, queue: &str) -> SchedulerResult<QueueMeta> {
        let mut conn = self.conn().await?;
        let now = self.clock.now();
        let meta_key = self.keys.meta(queue);

        let (created_ms, paused): (Option<i64>, Option<String>) = redis::pipe()
            .atomic()
            .hset_nx(&meta_key, "created_at", now.timestamp_millis())
            .ignore()
            .hset_nx(&meta_key, "paused", 0)
            .ignore()
            .hget(&meta_key, "created_at")
            .hget(&meta_key, "paused")
            .query_async(&mut *conn)
            .await?;

        self.open.lock().insert(queue.to_string());
        debug!(queue, "Opened engine queue");

        Ok(QueueMeta {
            created_at: created_ms.and_then(DateTime::from_timestamp_millis).unwrap_or(now),
            paused: paused.as_deref() == Some("1"),
        })
    }

    async fn close_queue(&self, queue: &str) -> SchedulerResult<()> {
        self.open.lock().remove(queue);
        debug!(queue, "Closed engine queue");
        Ok(())
    }

    async fn pause(&self, queue: &str) -> SchedulerResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(self.keys.meta(queue), "paused", 1).await?;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> SchedulerResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(self.keys.meta(queue), "paused", 0).await?;
        Ok(())
    }

    async fn purge(&self, queue: &str, partitions: &[JobPartition]) -> SchedulerResult<()> {
        let mut conn = self.conn().await?;
        let set_keys: Vec<String> = partitions
            .iter()
            .map(|partition| self.keys.partition(queue, *partition))
            .collect();

        for _ in 0..MAX_TX_ATTEMPTS {
            let _: () = redis::cmd("WATCH").arg(&set_keys).query_async(&mut *conn).await?;

            let mut ids: Vec<String> = Vec::new();
            for set_key in &set_keys {
                let members: Vec<String> = match conn.zrange(set_key, 0, -1).await {
                    Ok(members) => members,
                    Err(e) => {
                        let _: Result<(), _> = redis::cmd("UNWATCH").query_async(&mut *conn).await;
                        return Err(e.into());
                    }
                };
                ids.extend(members);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for id in &ids {
                pipe.del(self.keys.job(queue, id)).ignore();
            }
            for set_key in &set_keys {
                pipe.del(set_key).ignore();
            }
            if JobPartition::ALL.iter().all(|p| partitions.contains(p)) {
                pipe.del(self.keys.meta(queue)).ignore();
                pipe.del(self.keys.id_counter(queue)).ignore();
            }

            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                debug!(queue, removed = ids.len(), "Purged engine queue");
                return Ok(());
            }
            debug!(queue, "Partitions changed during purge, retrying");
        }

        Err(contended("Partitions", queue))
    }

    async fn add_job(&self, queue: &str, job: NewJob) -> SchedulerResult<JobRecord> {
        let now = self.clock.now();
        let run_at = job.options.first_run(now)?;

        let mut conn = self.conn().await?;
        let sequence: u64 = conn.incr(self.keys.id_counter(queue), 1).await?;
        let record = JobRecord::new(JobId::from_sequence(sequence), job, run_at, now);

        let json = serde_json::to_string(&record)?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.job(queue, record.id.as_str()), json)
            .ignore()
            .zadd(self.keys.partition(queue, record.partition), record.id.as_str(), record.score())
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(queue, job_id = %record.id, run_at = %record.run_at, "Added job");
        Ok(record)
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        self.read(&mut conn, queue, id).await
    }

    async fn get_jobs(&self, queue: &str, partition: JobPartition) -> SchedulerResult<Vec<JobRecord>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrange(self.keys.partition(queue, partition), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.keys.job(queue, id)).collect();
        let raw: Vec<Option<String>> = conn.mget(keys).await?;

        let mut records = Vec::with_capacity(raw.len());
        for json in raw.into_iter().flatten() {
            match serde_json::from_str::<JobRecord>(&json) {
                Ok(mut record) => {
                    record.partition = partition;
                    records.push(record);
                }
                Err(e) => warn!(queue, error = %e, "Skipping corrupt job record"),
            }
        }
        Ok(records)
    }

    async fn update_job(&self, queue: &str, id: &JobId, job: NewJob) -> SchedulerResult<Option<JobRecord>> {
        let now = self.clock.now();
        let run_at = job.options.first_run(now)?;

        self.transact(queue, id, |current| {
            let Some(mut record) = current else {
                return Ok(Step::Skip(None));
            };
            let from = record.partition;
            record.rewrite(job.clone(), run_at, now);
            let pipe = self.store(queue, &record, from)?;
            Ok(Step::Commit(pipe, Some(record)))
        })
        .await
    }

    async fn remove_job(&self, queue: &str, id: &JobId) -> SchedulerResult<bool> {
        self.transact(queue, id, |current| {
            let Some(record) = current else {
                return Ok(Step::Skip(false));
            };
            let mut pipe = redis::pipe();
            pipe.del(self.keys.job(queue, id.as_str())).ignore();
            for partition in source_sets(record.partition) {
                pipe.zrem(self.keys.partition(queue, *partition), id.as_str()).ignore();
            }
            Ok(Step::Commit(pipe, true))
        })
        .await
    }

    async fn pause_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        self.transact(queue, id, |current| {
            let Some(mut record) = current else {
                return Ok(Step::Skip(None));
            };
            let from = record.partition;
            if !record.pause() {
                return Ok(Step::Skip(Some(record)));
            }
            let pipe = self.store(queue, &record, from)?;
            Ok(Step::Commit(pipe, Some(record)))
        })
        .await
    }

    async fn resume_job(&self, queue: &str, id: &JobId) -> SchedulerResult<Option<JobRecord>> {
        let now = self.clock.now();
        self.transact(queue, id, |current| {
            let Some(mut record) = current else {
                return Ok(Step::Skip(None));
            };
            if !record.resume(now) {
                return Ok(Step::Skip(Some(record)));
            }
            let pipe = self.store(queue, &record, JobPartition::Paused)?;
            Ok(Step::Commit(pipe, Some(record)))
        })
        .await
    }

    async fn fetch_next(&self, queue: &str) -> SchedulerResult<Option<JobRecord>> {
        for _ in 0..MAX_TX_ATTEMPTS {
            let now = self.clock.now();
            let candidate: Option<String> = {
                let mut conn = self.conn().await?;
                self.peek_script
                    .key(self.keys.meta(queue))
                    .key(self.keys.partition(queue, JobPartition::Delayed))
                    .key(self.keys.partition(queue, JobPartition::Waiting))
                    .arg(now.timestamp_millis())
                    .invoke_async(&mut *conn)
                    .await?
            };
            let Some(id) = candidate.map(JobId::from) else {
                return Ok(None);
            };

            // None: the candidate was taken or changed before it was claimed.
            let claimed = self
                .transact(queue, &id, |current| match current {
                    None => {
                        warn!(queue, job_id = %id, "Waiting id has no record, dropping it");
                        let mut pipe = redis::pipe();
                        pipe.zrem(self.keys.partition(queue, JobPartition::Waiting), id.as_str())
                            .ignore();
                        Ok(Step::Commit(pipe, None))
                    }
                    Some(record) if record.partition != JobPartition::Waiting => Ok(Step::Skip(None)),
                    Some(mut record) => {
                        record.activate(now);
                        let pipe = self.store(queue, &record, JobPartition::Waiting)?;
                        Ok(Step::Commit(pipe, Some(record)))
                    }
                })
                .await?;

            if claimed.is_some() {
                return Ok(claimed);
            }
        }

        Err(contended("Waiting jobs", queue))
    }

    async fn settle(&self, queue: &str, id: &JobId, outcome: JobOutcome) -> SchedulerResult<Option<JobRecord>> {
        let now = self.clock.now();
        self.transact(queue, id, |current| {
            let Some(mut record) = current.filter(|record| record.partition == JobPartition::Active) else {
                return Ok(Step::Skip(None));
            };
            record.settle(&outcome, now);
            let pipe = self.store(queue, &record, JobPartition::Active)?;
            Ok(Step::Commit(pipe, Some(record)))
        })
        .await
    }
}
