//! Database access layer for synchronized records.
//!
//! All SQL touching the `records` table lives in this module. The
//! synchronization crate reaches the database only through these
//! repositories.

use std::sync::Arc;

use sqlx::PgPool;

pub mod records;
pub mod schema;

use crate::error::Result;

/// Container for repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for record selection and state updates.
    pub records: Arc<records::Repository>,
}

impl Storage {
    /// Creates a new storage instance over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { records: Arc::new(records::Repository::new(pool)) }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.records.pool()
    }

    /// Performs a round trip to the database.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if no connection can be acquired or the
    /// query fails.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.records.pool()).await?;

        Ok(())
    }
}
