use garde::Validate;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::generation::{GenerationRequest, JobLimits};
use crate::models::job::Job;
use crate::store::{JobStore, PersistenceError};

/// Entry point for the request-handling layer.
///
/// Validates submissions and delegates everything else to the store. Job
/// state after creation belongs to the worker.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    limits: JobLimits,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, limits: JobLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> JobLimits {
        self.limits
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate and persist a new `pending` job.
    ///
    /// Nothing is written when validation fails.
    #[instrument(skip(self))]
    pub async fn submit(&self, num_images: i64) -> Result<Job, JobError> {
        GenerationRequest { num_images }
            .validate_with(&self.limits)
            .map_err(|report| JobError::Validation(report.to_string().trim().to_string()))?;
        let num_images = i32::try_from(num_images)
            .map_err(|_| JobError::Validation(format!("numImages {num_images} is out of range")))?;

        let job = self.store.create(num_images).await?;
        metrics::counter!("generation_jobs_submitted_total").increment(1);
        info!(job_id = %job.id, num_images, "Job submitted");

        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        Ok(self.store.get(id).await?)
    }

    /// Jobs newest first.
    pub async fn list_jobs(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Job>, JobError> {
        if limit.is_some_and(|l| l < 0) || offset.is_some_and(|o| o < 0) {
            return Err(JobError::Validation(
                "limit and offset must not be negative".to_string(),
            ));
        }
        Ok(self.store.list(limit, offset).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
