//! Application configuration structures.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_core::TelemetryConfig;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Which engine and catalog implementation to run against.
    #[serde(default)]
    pub backend: Backend,

    /// Redis configuration (used when `backend = "redis"`).
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker binding configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Job scheduling rules.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: TelemetryConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "tessera-scheduler".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Storage backend for the queue engine and the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Redis engine and Redis catalog.
    #[default]
    Redis,
    /// In-process engine and catalog. Nothing survives a restart.
    Memory,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for engine queues and jobs.
    #[serde(default = "default_engine_prefix")]
    pub engine_key_prefix: String,

    /// Key prefix for the tenant/queue catalog.
    #[serde(default = "default_catalog_prefix")]
    pub catalog_key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            engine_key_prefix: default_engine_prefix(),
            catalog_key_prefix: default_catalog_prefix(),
        }
    }
}

impl RedisConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_engine_prefix() -> String {
    "tessera:engine".to_string()
}

fn default_catalog_prefix() -> String {
    "tessera:catalog".to_string()
}

/// Worker binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Delay between polls of an empty or paused queue, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Job execution timeout in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How long `unbind` waits for an in-flight job, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            job_timeout_secs: default_job_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the job timeout as a Duration.
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_poll_interval() -> u64 {
    250
}

fn default_job_timeout() -> u64 {
    300 // 5 minutes
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// What to do with a one-time job whose run time is already in the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PastRunAtPolicy {
    /// Refuse the job with an invalid-schedule error.
    #[default]
    Reject,
    /// Run the job immediately.
    Clamp,
}

/// Job scheduling rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Handling of `runAt` values in the past.
    #[serde(default)]
    pub past_run_at: PastRunAtPolicy,
}
