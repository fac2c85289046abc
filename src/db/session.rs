//! Scoped units of work over the connection pool.
//!
//! A scope is one transaction on one pooled connection. It commits when the
//! work returns `Ok`, rolls back when it returns `Err`, and the connection
//! goes back to the pool either way. If the scope future is dropped midway
//! (task cancelled or aborted) sqlx rolls the transaction back when the
//! connection is released.

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool};
use tracing::warn;

use crate::db::{self, PoolSettings};

/// Owns the pool and hands out transactional scopes.
#[derive(Clone)]
pub struct SessionManager {
    pool: PgPool,
}

impl SessionManager {
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, sqlx::Error> {
        let pool = db::init_pool(database_url, settings).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `work` inside a fresh transaction.
    ///
    /// ```ignore
    /// let job = sessions
    ///     .scope(|conn| Box::pin(async move { JobRepository::create(conn, 3).await }))
    ///     .await?;
    /// ```
    pub async fn scope<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<sqlx::Error> + Send,
    {
        let mut tx = self.pool.begin().await?;

        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed, connection will be discarded");
                }
                Err(err)
            }
        }
    }

    /// Check that a connection can be acquired and used.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Wait for checked-out connections to return, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
