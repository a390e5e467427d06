//! SQLite storage backend for lockout state
//!
//! Lockout records for the address-keyed limiter must survive restarts, so
//! they are kept in a single `lockout_states` table. Concurrent writers are
//! serialized per key with an optimistic version column; see
//! [`SqliteLockoutRepository`].
//!
//! ```rust,no_run
//! use lockout_core::RepositoryProvider;
//! use lockout_storage_sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), lockout_core::Error> {
//! let storage = SqliteStorage::connect("sqlite://lockout.db?mode=rwc").await?;
//! let provider = storage.into_repository_provider();
//! provider.migrate().await?;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

pub use repositories::{SqliteLockoutRepository, SqliteRepositoryProvider};

use lockout_core::{Error, error::StorageError};
use sqlx::SqlitePool;

/// A connected SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url` (e.g. `"sqlite::memory:"` or `"sqlite://path/to/db.sqlite"`).
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            Error::Storage(StorageError::Connection(e.to_string()))
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_repository_provider(self) -> SqliteRepositoryProvider {
        SqliteRepositoryProvider::new(self.pool)
    }
}
