//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_config::AppConfig;

pub use tessera_config::PastRunAtPolicy;

/// Configuration for the scheduler core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Worker binding configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Handling of one-time jobs scheduled in the past.
    #[serde(default)]
    pub past_run_at: PastRunAtPolicy,
}

impl JobsConfig {
    /// Sets the past run-time policy.
    #[must_use]
    pub fn with_past_run_at(mut self, policy: PastRunAtPolicy) -> Self {
        self.past_run_at = policy;
        self
    }

    /// Sets the worker configuration.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

impl From<&AppConfig> for JobsConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker: WorkerConfig {
                poll_interval_ms: config.worker.poll_interval_ms,
                job_timeout_ms: config.worker.job_timeout_secs.saturating_mul(1000),
                shutdown_timeout_ms: config.worker.shutdown_timeout_secs.saturating_mul(1000),
            },
            past_run_at: config.schedule.past_run_at,
        }
    }
}

/// Worker binding configuration.
///
/// Millisecond resolution so tests can run bindings with short timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Delay between polls of an empty or paused queue.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Job execution timeout.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_ms: u64,

    /// How long `unbind` waits for the in-flight job.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            job_timeout_ms: default_job_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

fn default_poll_interval() -> u64 {
    250
}

fn default_job_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_shutdown_timeout() -> u64 {
    30_000
}

impl WorkerConfig {
    /// Get poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get job timeout as Duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    /// Get shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JobsConfig::default();
        assert_eq!(config.past_run_at, PastRunAtPolicy::Reject);
        assert_eq!(config.worker.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.worker.job_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_from_app_config() {
        let mut app = AppConfig::default();
        app.worker.poll_interval_ms = 20;
        app.worker.job_timeout_secs = 2;
        app.worker.shutdown_timeout_secs = 3;
        app.schedule.past_run_at = PastRunAtPolicy::Clamp;

        let config = JobsConfig::from(&app);
        assert_eq!(config.worker.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.worker.job_timeout(), Duration::from_secs(2));
        assert_eq!(config.worker.shutdown_timeout(), Duration::from_secs(3));
        assert_eq!(config.past_run_at, PastRunAtPolicy::Clamp);
    }
}
