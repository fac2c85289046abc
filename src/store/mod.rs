//! The persistence seam the service and the worker are written against.
//!
//! Each method is one unit of work: implementations must not share a
//! transaction or lock between calls.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::job::{Job, StatusUpdate};

pub use crate::db::PersistenceError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` job.
    async fn create(&self, num_images: i32) -> Result<Job, PersistenceError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError>;

    /// All jobs, newest first.
    async fn list(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Job>, PersistenceError>;

    /// Pending jobs, oldest first.
    async fn list_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError>;

    /// List pending jobs oldest first and move each one to `processing`, as
    /// a single step. A job is returned to at most one caller.
    async fn claim_pending(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError>;

    /// Forward-only status write; see [`Job::apply`].
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Job, PersistenceError>;

    /// Liveness of the backing store.
    async fn ping(&self) -> Result<(), PersistenceError>;
}
