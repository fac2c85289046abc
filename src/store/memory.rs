use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, StatusUpdate};
use crate::store::{JobStore, PersistenceError};

/// In-process store with the same state machine as the Postgres one.
///
/// Jobs are kept in creation order. Each call takes the lock once and never
/// holds it across an await, so a call is atomic with respect to every
/// other call.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}

fn take(limit: Option<i64>) -> usize {
    limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(0))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, num_images: i32) -> Result<Job, PersistenceError> {
        let job = Job::new(num_images, Utc::now());
        self.jobs().push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        Ok(self.jobs().iter().find(|job| job.id == id).cloned())
    }

    async fn list(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        let skip = offset.map_or(0, |o| usize::try_from(o).unwrap_or(0));
        Ok(self
            .jobs()
            .iter()
            .rev()
            .skip(skip)
            .take(take(limit))
            .cloned()
            .collect())
    }

    async fn list_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        Ok(self
            .jobs()
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .take(take(limit))
            .cloned()
            .collect())
    }

    async fn claim_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        let now = Utc::now();
        let mut jobs = self.jobs();
        let mut claimed = Vec::new();

        for job in jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Pending)
            .take(take(limit))
        {
            job.apply(StatusUpdate::processing(), now)
                .map_err(|source| PersistenceError::Transition { id: job.id, source })?;
            claimed.push(job.clone());
        }

        Ok(claimed)
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Job, PersistenceError> {
        let mut jobs = self.jobs();
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(PersistenceError::NotFound(id))?;

        let to = update.status;
        if let Err(source) = job.apply(update, Utc::now()) {
            warn!(job_id = %id, from = %job.status, to = %to, error = %source, "Refusing status write");
            return Err(PersistenceError::Transition { id, source });
        }

        Ok(job.clone())
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
