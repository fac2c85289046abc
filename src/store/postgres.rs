use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::jobs::JobRepository;
use crate::db::session::SessionManager;
use crate::models::job::{Job, StatusUpdate};
use crate::store::{JobStore, PersistenceError};

/// Postgres-backed store. Every call runs in its own session scope.
#[derive(Clone)]
pub struct PgJobStore {
    sessions: SessionManager,
}

impl PgJobStore {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, num_images: i32) -> Result<Job, PersistenceError> {
        self.sessions
            .scope(|conn| Box::pin(async move { JobRepository::create(conn, num_images).await }))
            .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        self.sessions
            .scope(|conn| Box::pin(async move { JobRepository::get_by_id(conn, id).await }))
            .await
    }

    async fn list(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        self.sessions
            .scope(|conn| Box::pin(async move { JobRepository::list(conn, limit, offset).await }))
            .await
    }

    async fn list_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        self.sessions
            .scope(|conn| Box::pin(async move { JobRepository::list_pending(conn, limit).await }))
            .await
    }

    async fn claim_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        self.sessions
            .scope(|conn| {
                Box::pin(async move {
                    let pending = JobRepository::lock_pending(conn, limit).await?;
                    let mut claimed = Vec::with_capacity(pending.len());
                    for job in pending {
                        match JobRepository::claim(conn, job.id).await? {
                            Some(job) => claimed.push(job),
                            None => warn!(job_id = %job.id, "Job was claimed elsewhere, skipping"),
                        }
                    }
                    debug!(count = claimed.len(), "Claimed pending jobs");
                    Ok(claimed)
                })
            })
            .await
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Job, PersistenceError> {
        self.sessions
            .scope(|conn| Box::pin(async move { JobRepository::update_status(conn, id, update).await }))
            .await
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.sessions.ping().await?;
        Ok(())
    }
}
