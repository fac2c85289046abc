//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use imagegen_jobs::models::generation::JobLimits;
use imagegen_jobs::models::job::{Job, JobStatus, StatusUpdate};
use imagegen_jobs::services::jobs::JobService;
use imagegen_jobs::services::provider::{ImageProvider, ProviderError, VisionProvider};
use imagegen_jobs::services::storage::PassthroughStorage;
use imagegen_jobs::services::worker::{Worker, WorkerSettings};
use imagegen_jobs::store::{JobStore, MemoryJobStore, PersistenceError};

/// Returns `count` URLs derived from the prompt, optionally after a delay.
/// Tracks how many calls are in flight at once.
#[derive(Default)]
pub struct ScriptedImageProvider {
    delay: Duration,
    /// 1-based call number that fails, if any.
    fail_on_call: Option<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for ScriptedImageProvider {
    async fn generate_images(&self, prompt: &str, count: u32) -> Result<Vec<String>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on_call == Some(call) {
            return Err(ProviderError::Api {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }

        let slug = prompt.replace(' ', "-");
        Ok((0..count).map(|i| format!("https://img.test/{slug}/{i}.png")).collect())
    }
}

/// Always fails with an upstream error.
pub struct FailingImageProvider;

#[async_trait]
impl ImageProvider for FailingImageProvider {
    async fn generate_images(&self, _prompt: &str, _count: u32) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Api {
            status: 503,
            body: "model overloaded".to_string(),
        })
    }
}

/// Returns one image fewer than requested.
pub struct ShortImageProvider;

#[async_trait]
impl ImageProvider for ShortImageProvider {
    async fn generate_images(&self, _prompt: &str, count: u32) -> Result<Vec<String>, ProviderError> {
        Ok((1..count).map(|i| format!("https://img.test/{i}.png")).collect())
    }
}

/// Panics inside the job task.
pub struct PanickingImageProvider;

#[async_trait]
impl ImageProvider for PanickingImageProvider {
    async fn generate_images(&self, _prompt: &str, _count: u32) -> Result<Vec<String>, ProviderError> {
        panic!("provider blew up");
    }
}

pub struct FailingVisionProvider;

#[async_trait]
impl VisionProvider for FailingVisionProvider {
    async fn classify(&self, _image_url: &str) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Api {
            status: 429,
            body: "rate limited".to_string(),
        })
    }
}

fn injected() -> PersistenceError {
    PersistenceError::Database(sqlx::Error::PoolTimedOut)
}

/// Wraps [`MemoryJobStore`] and injects persistence failures on demand.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryJobStore,
    down: Arc<AtomicBool>,
    claim_failures: Arc<AtomicUsize>,
    failing_writes: Arc<Mutex<Vec<JobStatus>>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryJobStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Every call fails until set back to `false`.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// The next `n` claims fail.
    pub fn fail_next_claims(&self, n: usize) {
        self.claim_failures.store(n, Ordering::SeqCst);
    }

    /// Status writes targeting `status` fail.
    pub fn fail_writes_to(&self, status: JobStatus) {
        self.failing_writes.lock().unwrap().push(status);
    }

    fn check_down(&self) -> Result<(), PersistenceError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create(&self, num_images: i32) -> Result<Job, PersistenceError> {
        self.check_down()?;
        self.inner.create(num_images).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        self.check_down()?;
        self.inner.get(id).await
    }

    async fn list(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        self.check_down()?;
        self.inner.list(limit, offset).await
    }

    async fn list_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        self.check_down()?;
        self.inner.list_pending(limit).await
    }

    async fn claim_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        self.check_down()?;
        let failed = self
            .claim_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(injected());
        }
        self.inner.claim_pending(limit).await
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Job, PersistenceError> {
        self.check_down()?;
        let blocked = self.failing_writes.lock().unwrap().contains(&update.status);
        if blocked {
            return Err(injected());
        }
        self.inner.update_status(id, update).await
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.check_down()?;
        self.inner.ping().await
    }
}

pub fn service(store: Arc<dyn JobStore>) -> JobService {
    JobService::new(store, JobLimits::default())
}

pub fn worker(store: Arc<dyn JobStore>, provider: Arc<dyn ImageProvider>) -> Worker {
    worker_with(store, provider, WorkerSettings::default())
}

pub fn worker_with(store: Arc<dyn JobStore>, provider: Arc<dyn ImageProvider>, settings: WorkerSettings) -> Worker {
    Worker::new(store, provider, Arc::new(PassthroughStorage), settings)
}

pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(10),
        claim_limit: None,
    }
}

/// Poll the store until the job reaches `status` or `within` elapses.
pub async fn wait_for_status(store: &dyn JobStore, id: Uuid, status: JobStatus, within: Duration) -> Job {
    let deadline = Instant::now() + within;
    loop {
        let job = store.get(id).await.unwrap().expect("job exists");
        if job.status == status {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} still {} after {within:?}, expected {status}",
            job.status
        );
        sleep(Duration::from_millis(5)).await;
    }
}
