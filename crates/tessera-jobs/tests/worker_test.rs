//! Dispatch behaviour of worker bindings, driven by a manual clock.

mod common;

use chrono::Duration;
use common::{key, settle, wait_until, Harness, RecordingHandler};
use serde_json::json;
use std::time::Duration as StdDuration;
use tessera_jobs::worker::STOPPED_MID_RUN;
use tessera_jobs::{
    Clock, JobId, JobPartition, JobRequest, JobStatus, NotFoundKind, PastRunAtPolicy, QueueEngine, SchedulerError,
    SchedulerInterface,
};
use tokio_test::assert_ok;

async fn job_partition(h: &Harness, id: &JobId) -> Option<JobPartition> {
    h.partition("t1-alpha", id).await
}

#[tokio::test]
async fn test_one_time_job_runs_when_due() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let run_at = h.clock.now() + Duration::milliseconds(5_000);
    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("report", json!({"n": 1}), run_at))
        .await
        .unwrap();
    assert_eq!(job.partition, JobPartition::Delayed);
    assert_eq!(job.status(), JobStatus::Waiting);

    settle().await;
    assert_eq!(h.handler.count(), 0);
    assert_eq!(job_partition(&h, &job.id).await, Some(JobPartition::Delayed));

    h.clock.advance(Duration::milliseconds(5_000));
    wait_until("job to complete", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Completed)
    })
    .await;

    assert_eq!(h.handler.runs_of(&job.id), 1);
    let done = h.service.get_job("t1", "alpha", job.id.as_str()).await.unwrap();
    assert_eq!(done.status(), JobStatus::Completed);
    assert_eq!(done.dispatches, 1);
    assert!(done.finished_at.is_some());
}

#[tokio::test]
async fn test_past_run_at_is_rejected_or_clamped() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();
    let past = h.clock.now() - Duration::seconds(10);

    let err = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("late", json!(null), past))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidSchedule(_)));

    let h = Harness::with(PastRunAtPolicy::Clamp, RecordingHandler::default());
    h.service.create_scheduler("t1", "alpha").await.unwrap();
    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("late", json!(null), past))
        .await
        .unwrap();
    wait_until("clamped job to complete", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Completed)
    })
    .await;
}

#[tokio::test]
async fn test_recurring_job_honours_limit() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::recurring("tick", json!(null), "* * * * *", Some(3)))
        .await
        .unwrap();
    assert_eq!(job.partition, JobPartition::Delayed);

    for run in 1..=3 {
        h.clock.advance(Duration::minutes(1));
        wait_until("next dispatch to settle", || async {
            h.handler.runs_of(&job.id) == run
                && matches!(
                    job_partition(&h, &job.id).await,
                    Some(JobPartition::Delayed | JobPartition::Completed)
                )
        })
        .await;
    }

    assert_eq!(job_partition(&h, &job.id).await, Some(JobPartition::Completed));

    h.clock.advance(Duration::minutes(5));
    settle().await;
    assert_eq!(h.handler.runs_of(&job.id), 3);
}

#[tokio::test]
async fn test_invalid_cron_is_rejected() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let err = h
        .service
        .create_job("t1", "alpha", JobRequest::recurring("tick", json!(null), "not a cron", None))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_paused_queue_holds_jobs_until_resumed() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();
    h.service.pause_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("report", json!(null), h.clock.now()))
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.handler.count(), 0);
    assert_eq!(job_partition(&h, &job.id).await, Some(JobPartition::Waiting));

    h.service.resume_scheduler("t1", "alpha").await.unwrap();
    wait_until("job to complete after resume", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Completed)
    })
    .await;
}

#[tokio::test]
async fn test_paused_job_is_skipped() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let run_at = h.clock.now() + Duration::seconds(1);
    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("report", json!(null), run_at))
        .await
        .unwrap();
    let paused = h.service.pause_job("t1", "alpha", job.id.as_str()).await.unwrap();
    assert_eq!(paused.status(), JobStatus::Paused);

    h.clock.advance(Duration::seconds(2));
    settle().await;
    assert_eq!(h.handler.count(), 0);

    h.service.resume_job("t1", "alpha", job.id.as_str()).await.unwrap();
    wait_until("resumed job to complete", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Completed)
    })
    .await;
}

#[tokio::test]
async fn test_failing_handler_marks_job_failed() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("fail", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("job to fail", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Failed)
    })
    .await;

    let failed = h.service.get_job("t1", "alpha", job.id.as_str()).await.unwrap();
    assert_eq!(failed.last_error.as_deref(), Some("requested failure"));
}

#[tokio::test]
async fn test_crashed_worker_can_be_rebound() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let crash = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("panic", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("binding to be removed", || async {
        !h.service.workers().is_bound(&key("t1", "alpha"))
    })
    .await;

    // the queue stays registered but nothing dispatches
    assert_ok!(h.service.get_scheduler("t1", "alpha").await);
    assert_eq!(job_partition(&h, &crash.id).await, Some(JobPartition::Active));

    let next = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("report", json!(null), h.clock.now()))
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.handler.runs_of(&next.id), 0);

    assert!(h.service.rebind_worker("t1", "alpha").await.unwrap());
    assert!(!h.service.rebind_worker("t1", "alpha").await.unwrap());
    wait_until("job to run after rebind", || async { h.handler.runs_of(&next.id) == 1 }).await;
    assert_eq!(job_partition(&h, &crash.id).await, Some(JobPartition::Active));
}

#[tokio::test]
async fn test_rename_fails_job_running_past_shutdown_timeout() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("slow", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("slow job to start", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Active)
    })
    .await;

    h.service.rename_scheduler("t1", "alpha", "beta").await.unwrap();

    let stopped = h.engine.inner.get_job("t1-alpha", &job.id).await;
    let stopped = stopped.unwrap().unwrap();
    assert_eq!(stopped.partition, JobPartition::Failed);
    assert_eq!(stopped.last_error.as_deref(), Some(STOPPED_MID_RUN));
    assert!(h.service.workers().is_bound(&key("t1", "beta")));
}

#[tokio::test]
async fn test_unbind_waits_for_short_job() {
    let h = Harness::with(
        PastRunAtPolicy::Reject,
        RecordingHandler::with_slow_for(StdDuration::from_millis(100)),
    );
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("slow", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("slow job to start", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Active)
    })
    .await;

    assert!(h.service.workers().unbind(&key("t1", "alpha")).await);
    assert_eq!(job_partition(&h, &job.id).await, Some(JobPartition::Completed));
    assert_eq!(h.handler.runs_of(&job.id), 1);
}

#[tokio::test]
async fn test_deleting_active_job() {
    let h = Harness::with(
        PastRunAtPolicy::Reject,
        RecordingHandler::with_slow_for(StdDuration::from_millis(100)),
    );
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("slow", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("slow job to start", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Active)
    })
    .await;

    assert_ok!(h.service.delete_job("t1", "alpha", job.id.as_str()).await);
    wait_until("handler to finish", || async { h.handler.runs_of(&job.id) == 1 }).await;
    settle().await;

    let err = h.service.get_job("t1", "alpha", job.id.as_str()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { kind: NotFoundKind::Job, .. }));
    assert!(h.service.workers().is_bound(&key("t1", "alpha")));
}

#[tokio::test]
async fn test_delete_queue_waits_for_running_job() {
    let h = Harness::with(
        PastRunAtPolicy::Reject,
        RecordingHandler::with_slow_for(StdDuration::from_millis(100)),
    );
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("slow", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("slow job to start", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Active)
    })
    .await;

    assert_ok!(h.service.delete_scheduler("t1", "alpha").await);

    assert_eq!(h.handler.runs_of(&job.id), 1);
    let expected = vec![
        format!("settle t1-alpha {} completed", job.id),
        "purge t1-alpha".to_string(),
    ];
    assert_eq!(h.engine.journal(), expected);
    assert!(!h.engine.inner.queue_names().contains(&"t1-alpha".to_string()));
    assert!(!h.service.workers().is_bound(&key("t1", "alpha")));

    settle().await;
    assert_eq!(h.engine.journal(), expected);
    assert_eq!(h.engine.inner.job_count("t1-alpha"), 0);
}

#[tokio::test]
async fn test_delete_queue_fails_job_running_past_shutdown_timeout() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("slow", json!(null), h.clock.now()))
        .await
        .unwrap();
    wait_until("slow job to start", || async {
        job_partition(&h, &job.id).await == Some(JobPartition::Active)
    })
    .await;

    assert_ok!(h.service.delete_scheduler("t1", "alpha").await);

    let expected = vec![
        format!("settle t1-alpha {} failed: {}", job.id, STOPPED_MID_RUN),
        "purge t1-alpha".to_string(),
    ];
    assert_eq!(h.engine.journal(), expected);
    assert_eq!(h.handler.runs_of(&job.id), 0);
    assert!(!h.engine.inner.queue_names().contains(&"t1-alpha".to_string()));

    settle().await;
    assert_eq!(h.engine.journal(), expected);
    assert_eq!(h.engine.inner.job_count("t1-alpha"), 0);
    let err = h.service.list_jobs("t1", "alpha").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { kind: NotFoundKind::Queue, .. }));
}

#[tokio::test]
async fn test_non_canonical_job_id_is_not_found() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();
    let run_at = h.clock.now() + Duration::minutes(5);
    let job = h
        .service
        .create_job("t1", "alpha", JobRequest::one_time("report", json!(null), run_at))
        .await
        .unwrap();
    assert_eq!(job.id.as_str(), "1");

    for alias in ["01", "+1", "0001"] {
        let err = h.service.get_job("t1", "alpha", alias).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { kind: NotFoundKind::Job, .. }), "{alias}");
        let err = h.service.delete_job("t1", "alpha", alias).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { kind: NotFoundKind::Job, .. }), "{alias}");
        assert!(h.service.pause_job("t1", "alpha", alias).await.is_err());
    }
    assert_ok!(h.service.get_job("t1", "alpha", "1").await);
}

#[tokio::test]
async fn test_update_job_reschedules() {
    let h = Harness::new();
    h.service.create_scheduler("t1", "alpha").await.unwrap();

    let job = h
        .service
        .create_job(
            "t1",
            "alpha",
            JobRequest::one_time("report", json!(null), h.clock.now() + Duration::hours(1)),
        )
        .await
        .unwrap();

    let updated = h
        .service
        .update_job(
            "t1",
            "alpha",
            job.id.as_str(),
            JobRequest::one_time("digest", json!({"v": 2}), h.clock.now()),
        )
        .await
        .unwrap();
    assert_eq!(updated.id, job.id);
    assert_eq!(updated.name, "digest");

    wait_until("updated job to run", || async { h.handler.names() == vec!["digest".to_string()] }).await;
}
