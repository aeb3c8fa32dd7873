//! Metrics for queue, job and worker monitoring.
//!
//! Recorders go through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Queues registered.
    pub const QUEUES_REGISTERED_TOTAL: &str = "tessera_queues_registered_total";
    /// Queues deleted.
    pub const QUEUES_DELETED_TOTAL: &str = "tessera_queues_deleted_total";
    /// Queue operations that failed against the engine or catalog.
    pub const QUEUE_OPERATION_FAILURES_TOTAL: &str = "tessera_queue_operation_failures_total";
    /// Queues currently registered.
    pub const QUEUES_REGISTERED: &str = "tessera_queues_registered";

    /// Jobs created.
    pub const JOBS_CREATED_TOTAL: &str = "tessera_jobs_created_total";
    /// Jobs dispatched to a handler.
    pub const JOBS_DISPATCHED_TOTAL: &str = "tessera_jobs_dispatched_total";
    /// Jobs whose handler succeeded.
    pub const JOBS_COMPLETED_TOTAL: &str = "tessera_jobs_completed_total";
    /// Jobs whose handler failed.
    pub const JOBS_FAILED_TOTAL: &str = "tessera_jobs_failed_total";
    /// Jobs whose handler timed out.
    pub const JOBS_TIMED_OUT_TOTAL: &str = "tessera_jobs_timed_out_total";
    /// Handler execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "tessera_job_duration_seconds";

    /// Worker bindings currently running.
    pub const WORKERS_BOUND: &str = "tessera_workers_bound";
    /// Worker loops that ended without a shutdown request.
    pub const WORKERS_CRASHED_TOTAL: &str = "tessera_workers_crashed_total";

    /// Catalog entries recovered at startup.
    pub const BOOTSTRAP_RECOVERED_TOTAL: &str = "tessera_bootstrap_recovered_total";
    /// Catalog entries skipped at startup.
    pub const BOOTSTRAP_FAILURES_TOTAL: &str = "tessera_bootstrap_failures_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Queue metrics
    describe_counter!(
        names::QUEUES_REGISTERED_TOTAL,
        "Total number of queues registered"
    );
    describe_counter!(
        names::QUEUES_DELETED_TOTAL,
        "Total number of queues deleted"
    );
    describe_counter!(
        names::QUEUE_OPERATION_FAILURES_TOTAL,
        "Queue operations that failed against the engine or catalog"
    );
    describe_gauge!(
        names::QUEUES_REGISTERED,
        "Current number of registered queues"
    );

    // Job metrics
    describe_counter!(
        names::JOBS_CREATED_TOTAL,
        "Total number of jobs created"
    );
    describe_counter!(
        names::JOBS_DISPATCHED_TOTAL,
        "Total number of jobs dispatched to a handler"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of job runs that completed"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of job runs that failed"
    );
    describe_counter!(
        names::JOBS_TIMED_OUT_TOTAL,
        "Total number of job runs that timed out"
    );
    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job handler duration in seconds"
    );

    // Worker metrics
    describe_gauge!(
        names::WORKERS_BOUND,
        "Number of running worker bindings"
    );
    describe_counter!(
        names::WORKERS_CRASHED_TOTAL,
        "Worker loops that ended without a shutdown request"
    );

    // Bootstrap metrics
    describe_counter!(
        names::BOOTSTRAP_RECOVERED_TOTAL,
        "Catalog entries recovered at startup"
    );
    describe_counter!(
        names::BOOTSTRAP_FAILURES_TOTAL,
        "Catalog entries skipped at startup"
    );
}

/// Queue metrics recorder.
#[derive(Clone)]
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a queue registered.
    pub fn queue_registered(tenant: &str) {
        counter!(names::QUEUES_REGISTERED_TOTAL, "tenant" => tenant.to_string()).increment(1);
    }

    /// Record a queue deleted.
    pub fn queue_deleted(tenant: &str) {
        counter!(names::QUEUES_DELETED_TOTAL, "tenant" => tenant.to_string()).increment(1);
    }

    /// Record a failed queue operation.
    pub fn operation_failed(operation: &'static str, error_code: &'static str) {
        counter!(
            names::QUEUE_OPERATION_FAILURES_TOTAL,
            "operation" => operation,
            "error_code" => error_code
        )
        .increment(1);
    }

    /// Update the registered queue gauge.
    pub fn update_registered(count: usize) {
        gauge!(names::QUEUES_REGISTERED).set(count as f64);
    }
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job created.
    pub fn job_created(queue: &str, recurring: bool) {
        counter!(
            names::JOBS_CREATED_TOTAL,
            "queue" => queue.to_string(),
            "kind" => if recurring { "recurring" } else { "one_time" }
        )
        .increment(1);
    }

    /// Record a job dispatched.
    pub fn job_dispatched(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_DISPATCHED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job run completed.
    pub fn job_completed(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job run failed.
    pub fn job_failed(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job run timed out.
    pub fn job_timed_out(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_TIMED_OUT_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update the bound worker gauge.
    pub fn update_bound(count: usize) {
        gauge!(names::WORKERS_BOUND).set(count as f64);
    }

    /// Record a worker crash.
    pub fn worker_crashed(queue: &str) {
        counter!(names::WORKERS_CRASHED_TOTAL, "queue" => queue.to_string()).increment(1);
    }
}

/// Bootstrap metrics recorder.
#[derive(Clone)]
pub struct BootstrapMetrics;

impl BootstrapMetrics {
    /// Record the outcome of a bootstrap run.
    pub fn record(recovered: usize, failures: usize) {
        counter!(names::BOOTSTRAP_RECOVERED_TOTAL).increment(recovered as u64);
        counter!(names::BOOTSTRAP_FAILURES_TOTAL).increment(failures as u64);
    }
}
