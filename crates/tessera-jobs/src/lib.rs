//! Tessera Jobs - tenant-scoped queue registry and job scheduling
//!
//! Tenants own named queues; each queue is backed by a queue in an external
//! execution engine and has exactly one worker binding pulling its jobs.
//! Which queues exist is recorded in a durable catalog and rebuilt from it
//! at startup.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SchedulerService                         │
//! │                                                              │
//! │  ┌──────────────────┐   ┌──────────────────┐                 │
//! │  │   QueueManager   │   │   JobLifecycle   │                 │
//! │  └──┬─────┬──────┬──┘   └────────┬─────────┘                 │
//! │     │     │      │               │                           │
//! │     │     │      ▼               ▼                           │
//! │     │     │  ┌───────────────────────┐                       │
//! │     │     │  │     QueueRegistry     │  tenant → queue slots │
//! │     │     │  └───────────────────────┘                       │
//! │     │     ▼                                                  │
//! │     │  ┌───────────────┐    one binding per queue            │
//! │     │  │ WorkerManager │──► poll loop ──► outcome task       │
//! │     │  └───────┬───────┘                                     │
//! │     ▼          ▼                                             │
//! │  ┌──────────────┐   ┌──────────────────────┐                 │
//! │  │ CatalogStore │   │     QueueEngine      │                 │
//! │  │ Redis/Memory │   │ Redis/Memory engine  │                 │
//! │  └──────────────┘   └──────────────────────┘                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_jobs::{bootstrap, JobRequest, LoggingHandler, SchedulerInterface};
//!
//! let (service, report) = bootstrap(engine, catalog, Arc::new(LoggingHandler), &config, clock).await?;
//! service.create_scheduler("acme", "reports").await?;
//! service
//!     .create_job("acme", "reports", JobRequest::recurring("digest", payload, "0 8 * * *", None))
//!     .await?;
//! ```

pub mod bootstrap;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod cron;
pub mod di;
pub mod engine;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod worker;

pub use bootstrap::{bootstrap, BootstrapFailure, BootstrapReport};
pub use catalog::{CatalogEntry, CatalogStore, MemoryCatalog, RedisCatalog, StoredEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{JobsConfig, PastRunAtPolicy, WorkerConfig};
pub use cron::CronSchedule;
pub use di::{SchedulerDetails, SchedulerInterface, SchedulerService};
pub use engine::{MemoryEngine, QueueEngine, RedisEngine};
pub use error::{NotFoundKind, SchedulerError, SchedulerResult};
pub use job::{
    JobId, JobOptions, JobOutcome, JobPartition, JobRecord, JobRequest, JobStatus, JobsByState, NewJob,
    ScheduleSpec,
};
pub use lifecycle::JobLifecycle;
pub use manager::QueueManager;
pub use metrics::{register_metrics, BootstrapMetrics, JobMetrics, QueueMetrics, WorkerMetrics};
pub use pool::create_pool;
pub use queue::{QueueHandle, QueueKey, QueueMeta, QueueState};
pub use registry::{QueueRegistry, Reservation};
pub use worker::{HandlerError, JobContext, JobHandler, LoggingHandler, WorkerManager};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::catalog::CatalogStore;
    pub use crate::di::SchedulerInterface;
    pub use crate::engine::QueueEngine;
    pub use crate::worker::JobHandler;
    pub use crate::{JobRequest, ScheduleSpec, SchedulerError, SchedulerResult};
}
