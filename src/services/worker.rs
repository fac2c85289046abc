//! Background worker that drives jobs from `pending` to a terminal state.
//!
//! One long-lived poll loop per process. Each iteration claims pending jobs
//! (oldest first) in a single store call, then processes every claimed job
//! in its own task and waits for all of them before sleeping. A job's
//! failure is written into that job and goes no further: the loop only logs
//! what it cannot record.

use futures::FutureExt;
use rand::seq::IndexedRandom;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{Job, JobStatus, StatusUpdate};
use crate::services::provider::{ImageProvider, ProviderError};
use crate::services::storage::{ImageStorage, StorageError};
use crate::store::{JobStore, PersistenceError};

/// Subjects a job may be generated for.
pub const ANIMALS: [&str; 20] = [
    "cat", "dog", "elephant", "lion", "tiger", "bear", "giraffe", "zebra", "panda", "koala", "fox",
    "wolf", "rabbit", "deer", "penguin", "owl", "eagle", "dolphin", "whale", "octopus",
];

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    /// Cap on jobs claimed per iteration; `None` claims every pending job.
    pub claim_limit: Option<i64>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            claim_limit: None,
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            claim_limit: config.worker_claim_limit,
        }
    }
}

/// How a single job's unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// The job was missing or not in `processing`; nothing was written.
    Skipped,
    /// The terminal write did not land; the job is left in `processing`.
    Stuck,
}

/// Tally of one poll iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stuck: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Stuck => self.stuck += 1,
        }
    }
}

/// Cause of a job failure. Its message is what gets stored on the job.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Job processing panicked: {0}")]
    Panicked(String),
}

#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ImageProvider>,
    storage: Arc<dyn ImageStorage>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ImageProvider>,
        storage: Arc<dyn ImageStorage>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            provider,
            storage,
            settings,
        }
    }

    /// Start the poll loop on the runtime. Stop it with [`WorkerHandle::shutdown`].
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        WorkerHandle { cancel, task }
    }

    /// Poll until `cancel` fires.
    ///
    /// Cancellation is only observed between iterations, so jobs claimed in
    /// the current iteration always run to a terminal write.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            claim_limit = ?self.settings.claim_limit,
            "Worker started"
        );

        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(summary) if summary.claimed > 0 => {
                    info!(
                        claimed = summary.claimed,
                        completed = summary.completed,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        stuck = summary.stuck,
                        "Poll iteration finished"
                    );
                }
                Ok(_) => trace!("No pending jobs"),
                Err(e) => {
                    metrics::counter!("generation_worker_poll_errors_total").increment(1);
                    error!(error = %e, "Poll iteration failed, retrying next cycle");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.poll_interval) => {}
            }
        }

        info!("Worker stopped");
    }

    /// One iteration: claim pending jobs, process them concurrently, wait
    /// for all of them.
    pub async fn poll_once(&self) -> Result<PollSummary, PersistenceError> {
        let claimed = self.store.claim_pending(self.settings.claim_limit).await?;
        metrics::gauge!("generation_jobs_claimed").set(claimed.len() as f64);

        let mut summary = PollSummary {
            claimed: claimed.len(),
            ..PollSummary::default()
        };
        if claimed.is_empty() {
            return Ok(summary);
        }
        info!(count = claimed.len(), "Claimed pending jobs");

        let mut tasks = JoinSet::new();
        for job in claimed {
            let worker = self.clone();
            tasks.spawn(async move { worker.process_contained(job.id).await });
        }

        // Panics are caught per job, so a join error here means the task was aborted.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(error = %e, "Job task did not finish, job left in processing");
                    summary.stuck += 1;
                }
            }
        }

        Ok(summary)
    }

    /// [`Worker::process_job`], with a panic recorded as the job's failure.
    async fn process_contained(&self, id: Uuid) -> JobOutcome {
        match AssertUnwindSafe(self.process_job(id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job_id = %id, panic = %message, "Job processing panicked");
                self.record_failure(id, ProcessError::Panicked(message)).await
            }
        }
    }

    /// Process one claimed job through to a terminal write.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn process_job(&self, id: Uuid) -> JobOutcome {
        let job = match self.store.get(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!("Claimed job no longer exists");
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "Failed to re-read claimed job, leaving it in processing");
                return JobOutcome::Stuck;
            }
        };
        if job.status != JobStatus::Processing {
            warn!(status = %job.status, "Job is not in processing, skipping");
            return JobOutcome::Skipped;
        }

        let started = Instant::now();
        let animal = pick_animal();
        info!(num_images = job.num_images, animal, "Processing job");

        let outcome = match self.generate(&job, animal).await {
            Ok(urls) => {
                let count = urls.len();
                match self
                    .store
                    .update_status(id, StatusUpdate::completed(animal, urls))
                    .await
                {
                    Ok(_) => {
                        metrics::counter!("generation_jobs_completed_total").increment(1);
                        info!(images = count, "Job completed");
                        JobOutcome::Completed
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to record completion");
                        self.record_failure(id, e.into()).await
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Job processing failed");
                self.record_failure(id, e).await
            }
        };

        metrics::histogram!("generation_job_processing_seconds").record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn generate(&self, job: &Job, animal: &str) -> Result<Vec<String>, ProcessError> {
        let prompt = format!("a cute {animal}");
        let requested = u32::try_from(job.num_images)
            .map_err(|_| ProviderError::Malformed(format!("invalid image count {}", job.num_images)))?;

        let images = self.provider.generate_images(&prompt, requested).await?;
        if images.len() != requested as usize {
            return Err(ProviderError::CountMismatch {
                requested,
                returned: images.len(),
            }
            .into());
        }

        Ok(self.storage.materialize_urls(images, job.id).await?)
    }

    /// Best-effort `failed` write.
    async fn record_failure(&self, id: Uuid, cause: ProcessError) -> JobOutcome {
        match self
            .store
            .update_status(id, StatusUpdate::failed(cause.to_string()))
            .await
        {
            Ok(_) => {
                metrics::counter!("generation_jobs_failed_total").increment(1);
                JobOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, cause = %cause, "Failed to record job failure, job left in processing");
                JobOutcome::Stuck
            }
        }
    }
}

fn pick_animal() -> &'static str {
    ANIMALS.choose(&mut rand::rng()).copied().unwrap_or("cat")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owner of a running poll loop.
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop claiming, then wait up to `grace` for in-flight jobs.
    ///
    /// Returns `false` if the loop had to be aborted. Aborted jobs stay in
    /// `processing`; their open transactions roll back when dropped.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();
        let mut task = self.task;

        match timeout(grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Worker task ended abnormally");
                false
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs_f64(), "Worker did not drain in time, aborting");
                task.abort();
                let _ = task.await;
                false
            }
        }
    }
}
