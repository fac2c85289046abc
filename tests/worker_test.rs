//! Worker lifecycle tests against the in-memory store.
//!
//! Run with: cargo test --test worker_test

mod helpers;

use helpers::*;
use std::sync::Arc;
use std::time::Duration;

use imagegen_jobs::models::job::JobStatus;
use imagegen_jobs::services::provider::MockImageProvider;
use imagegen_jobs::services::worker::{JobOutcome, PollSummary, WorkerSettings, ANIMALS};
use imagegen_jobs::store::{JobStore, MemoryJobStore};

#[tokio::test]
async fn test_submitted_job_completes() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(3).await.unwrap();
    let worker = worker(store.clone(), Arc::new(MockImageProvider::default()));

    let summary = worker.poll_once().await.unwrap();
    assert_eq!(
        summary,
        PollSummary {
            claimed: 1,
            completed: 1,
            ..PollSummary::default()
        }
    );

    let done = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.image_urls.len(), 3);
    assert!(done.error.is_none());

    let animal = done.animal.as_deref().unwrap();
    assert!(ANIMALS.contains(&animal));
    assert!(done.image_urls[0].contains(&format!("a+cute+{animal}")));
    assert!(done.updated_at > done.created_at);
}

#[tokio::test]
async fn test_provider_failure_marks_job_failed() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(2).await.unwrap();

    let summary = worker(store.clone(), Arc::new(FailingImageProvider))
        .poll_once()
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.image_urls.is_empty());
    assert!(failed.animal.is_none());
    let error = failed.error.unwrap();
    assert!(error.contains("503"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_short_provider_reply_fails_job() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(4).await.unwrap();

    worker(store.clone(), Arc::new(ShortImageProvider))
        .poll_once()
        .await
        .unwrap();

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("returned 3 images, 4 were requested"));
}

#[tokio::test]
async fn test_one_failure_does_not_affect_siblings() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let jobs = service(store.clone());
    for n in 1..=5 {
        jobs.submit(n).await.unwrap();
    }

    let summary = worker(store.clone(), Arc::new(ScriptedImageProvider::failing_on_call(2)))
        .poll_once()
        .await
        .unwrap();
    assert_eq!(summary.claimed, 5);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 1);

    let all = store.list(None, None).await.unwrap();
    assert!(all.iter().all(|job| job.is_terminal()));
    for job in all.iter().filter(|job| job.status == JobStatus::Completed) {
        assert_eq!(job.image_urls.len(), job.num_images as usize);
    }
}

#[tokio::test]
async fn test_claimed_jobs_run_concurrently() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let jobs = service(store.clone());
    for _ in 0..4 {
        jobs.submit(1).await.unwrap();
    }

    let provider = Arc::new(ScriptedImageProvider::with_delay(Duration::from_millis(50)));
    let summary = worker(store.clone(), provider.clone()).poll_once().await.unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(provider.calls(), 4);
    assert_eq!(provider.max_in_flight(), 4);
}

#[tokio::test]
async fn test_concurrent_polls_never_share_a_job() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let jobs = service(store.clone());
    for _ in 0..10 {
        jobs.submit(1).await.unwrap();
    }

    let provider = Arc::new(ScriptedImageProvider::with_delay(Duration::from_millis(5)));
    let a = worker(store.clone(), provider.clone());
    let b = worker(store.clone(), provider.clone());

    let (first, second) = tokio::join!(a.poll_once(), b.poll_once());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.claimed + second.claimed, 10);
    assert_eq!(first.completed + second.completed, 10);
    assert_eq!(provider.calls(), 10);
}

#[tokio::test]
async fn test_claim_limit_leaves_rest_pending() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let jobs = service(store.clone());
    for _ in 0..5 {
        jobs.submit(1).await.unwrap();
    }

    let settings = WorkerSettings {
        claim_limit: Some(2),
        ..WorkerSettings::default()
    };
    let summary = worker_with(store.clone(), Arc::new(ScriptedImageProvider::new()), settings)
        .poll_once()
        .await
        .unwrap();

    assert_eq!(summary.claimed, 2);
    assert_eq!(store.list_pending(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_terminal_jobs_are_left_alone() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(2).await.unwrap();
    let worker = worker(store.clone(), Arc::new(ScriptedImageProvider::new()));

    worker.poll_once().await.unwrap();
    let done = store.get(job.id).await.unwrap().unwrap();

    let again = worker.poll_once().await.unwrap();
    assert_eq!(again, PollSummary::default());
    assert_eq!(worker.process_job(job.id).await, JobOutcome::Skipped);
    assert_eq!(store.get(job.id).await.unwrap().unwrap(), done);
}

#[tokio::test]
async fn test_unclaimed_or_unknown_job_is_skipped() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(1).await.unwrap();
    let worker = worker(store.clone(), Arc::new(ScriptedImageProvider::new()));

    assert_eq!(worker.process_job(job.id).await, JobOutcome::Skipped);
    assert_eq!(worker.process_job(uuid::Uuid::new_v4()).await, JobOutcome::Skipped);
    assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_failed_completion_write_records_failure() {
    let flaky = FlakyStore::new(MemoryJobStore::new());
    flaky.fail_writes_to(JobStatus::Completed);
    let store: Arc<dyn JobStore> = Arc::new(flaky);
    let job = service(store.clone()).submit(2).await.unwrap();

    let summary = worker(store.clone(), Arc::new(ScriptedImageProvider::new()))
        .poll_once()
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.image_urls.is_empty());
    assert!(failed.error.unwrap().contains("pool timed out"));
}

#[tokio::test]
async fn test_unrecordable_job_stays_processing() {
    let flaky = FlakyStore::new(MemoryJobStore::new());
    flaky.fail_writes_to(JobStatus::Completed);
    flaky.fail_writes_to(JobStatus::Failed);
    let store: Arc<dyn JobStore> = Arc::new(flaky);
    let job = service(store.clone()).submit(1).await.unwrap();

    let summary = worker(store.clone(), Arc::new(ScriptedImageProvider::new()))
        .poll_once()
        .await
        .unwrap();
    assert_eq!(summary.stuck, 1);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn test_panicking_job_is_contained() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let jobs = service(store.clone());
    for _ in 0..3 {
        jobs.submit(1).await.unwrap();
    }

    let summary = worker(store.clone(), Arc::new(PanickingImageProvider))
        .poll_once()
        .await
        .unwrap();
    assert_eq!(
        summary,
        PollSummary {
            claimed: 3,
            failed: 3,
            ..PollSummary::default()
        }
    );

    let all = store.list(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
    for job in all {
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert!(error.contains("provider blew up"), "unexpected error: {error}");
    }
}

#[tokio::test]
async fn test_panicking_loop_keeps_polling() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(1).await.unwrap();

    let handle = worker_with(store.clone(), Arc::new(PanickingImageProvider), fast_settings()).spawn();
    wait_for_status(store.as_ref(), job.id, JobStatus::Failed, Duration::from_secs(5)).await;

    let later = service(store.clone()).submit(1).await.unwrap();
    wait_for_status(store.as_ref(), later.id, JobStatus::Failed, Duration::from_secs(5)).await;
    assert!(handle.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_claim_error_is_reported() {
    let flaky = FlakyStore::new(MemoryJobStore::new());
    flaky.fail_next_claims(1);
    let store: Arc<dyn JobStore> = Arc::new(flaky);
    service(store.clone()).submit(1).await.unwrap();

    let worker = worker(store.clone(), Arc::new(ScriptedImageProvider::new()));
    assert!(worker.poll_once().await.is_err());
    assert_eq!(store.list_pending(None).await.unwrap().len(), 1);
    assert_eq!(worker.poll_once().await.unwrap().completed, 1);
}

#[tokio::test]
async fn test_loop_survives_claim_errors() {
    let flaky = FlakyStore::new(MemoryJobStore::new());
    flaky.fail_next_claims(3);
    let store: Arc<dyn JobStore> = Arc::new(flaky);
    let job = service(store.clone()).submit(2).await.unwrap();

    let handle = worker_with(store.clone(), Arc::new(ScriptedImageProvider::new()), fast_settings()).spawn();
    let done = wait_for_status(store.as_ref(), job.id, JobStatus::Completed, Duration::from_secs(5)).await;
    assert_eq!(done.image_urls.len(), 2);

    assert!(handle.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_jobs() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(1).await.unwrap();

    let provider = Arc::new(ScriptedImageProvider::with_delay(Duration::from_millis(200)));
    let handle = worker_with(store.clone(), provider, fast_settings()).spawn();
    wait_for_status(store.as_ref(), job.id, JobStatus::Processing, Duration::from_secs(5)).await;

    assert!(handle.shutdown(Duration::from_secs(5)).await);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_shutdown_aborts_after_grace() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let job = service(store.clone()).submit(1).await.unwrap();

    let provider = Arc::new(ScriptedImageProvider::with_delay(Duration::from_secs(30)));
    let handle = worker_with(store.clone(), provider, fast_settings()).spawn();
    wait_for_status(store.as_ref(), job.id, JobStatus::Processing, Duration::from_secs(5)).await;

    assert!(!handle.shutdown(Duration::from_millis(50)).await);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn test_idle_worker_stops_promptly() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let settings = WorkerSettings {
        poll_interval: Duration::from_secs(60),
        claim_limit: None,
    };
    let handle = worker_with(store, Arc::new(ScriptedImageProvider::new()), settings).spawn();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!handle.is_finished());
    assert!(handle.shutdown(Duration::from_secs(1)).await);
}
