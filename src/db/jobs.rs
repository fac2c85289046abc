//! Row mapping and statements for the `jobs` table.
//!
//! Every function runs on a caller-supplied connection, normally the
//! transaction of a [`SessionManager`](crate::db::session::SessionManager)
//! scope. Nothing is cached between calls.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::db::PersistenceError;
use crate::models::job::{Job, JobStatus, StatusUpdate};

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, status, num_images, animal, image_urls, error, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    num_images: i32,
    animal: Option<String>,
    image_urls: Vec<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = PersistenceError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).map_err(|_| {
            PersistenceError::Corrupt(format!("job {} has unknown status '{}'", row.id, row.status))
        })?;

        Ok(Job {
            id: row.id,
            status,
            num_images: row.num_images,
            animal: row.animal,
            image_urls: row.image_urls,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, PersistenceError> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Stateless access to persisted jobs.
pub struct JobRepository;

impl JobRepository {
    /// Insert a new pending job.
    pub async fn create(conn: &mut PgConnection, num_images: i32) -> Result<Job, PersistenceError> {
        let job = Job::new(num_images, Utc::now());
        let query = format!(
            "INSERT INTO jobs (id, status, num_images, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(job.num_images)
            .bind(job.created_at)
            .fetch_one(&mut *conn)
            .await?;

        row.try_into()
    }

    /// Point lookup. `None` when the id is unknown.
    pub async fn get_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Pending jobs, oldest first. `limit = None` returns all of them.
    pub async fn list_pending(
        conn: &mut PgConnection,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, PersistenceError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC \
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        into_jobs(rows)
    }

    /// Like [`list_pending`](Self::list_pending) but row-locks the result for
    /// the rest of the transaction, skipping rows another transaction holds.
    pub async fn lock_pending(
        conn: &mut PgConnection,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, PersistenceError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        into_jobs(rows)
    }

    /// Conditional `pending -> processing` write.
    ///
    /// Returns `None` if the job no longer exists or is not pending, which
    /// means someone else already claimed it.
    pub async fn claim(conn: &mut PgConnection, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        let query = format!(
            "UPDATE jobs \
             SET status = 'processing', updated_at = GREATEST($2, updated_at) \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Write a new status plus its terminal fields.
    ///
    /// The row is locked, the write is checked against the job's state
    /// machine, and only then persisted. Backward or repeated moves are
    /// refused with [`PersistenceError::Transition`].
    pub async fn update_status(
        conn: &mut PgConnection,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<Job, PersistenceError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(PersistenceError::NotFound(id))?;
        let mut job = Job::try_from(row)?;

        let to = update.status;
        if let Err(source) = job.apply(update, Utc::now()) {
            warn!(job_id = %id, from = %job.status, to = %to, error = %source, "Refusing status write");
            return Err(PersistenceError::Transition { id, source });
        }

        let query = format!(
            "UPDATE jobs \
             SET status = $2, animal = $3, image_urls = $4, error = $5, updated_at = $6 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(&job.animal)
            .bind(&job.image_urls)
            .bind(&job.error)
            .bind(job.updated_at)
            .fetch_one(&mut *conn)
            .await?;

        row.try_into()
    }

    /// All jobs, newest first.
    pub async fn list(
        conn: &mut PgConnection,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Job>, PersistenceError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             ORDER BY created_at DESC, id DESC \
             LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .bind(offset.unwrap_or(0))
            .fetch_all(&mut *conn)
            .await?;

        into_jobs(rows)
    }
}
