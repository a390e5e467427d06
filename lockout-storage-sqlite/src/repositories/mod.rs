//! Repository implementations for SQLite storage

pub mod lockout;

pub use lockout::SqliteLockoutRepository;

use async_trait::async_trait;
use lockout_core::{Error, error::StorageError, repositories::RepositoryProvider};
use lockout_migration::MigrationManager;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::migrations::{self, SqliteMigrationManager};

/// Repository provider implementation for SQLite
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    lockout: Arc<SqliteLockoutRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let lockout = Arc::new(SqliteLockoutRepository::new(pool.clone()));
        Self { pool, lockout }
    }

    /// Use a preconfigured repository (e.g. with a custom statement timeout).
    pub fn with_lockout_repository(mut self, repository: SqliteLockoutRepository) -> Self {
        self.lockout = Arc::new(repository);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    type LockoutRepo = SqliteLockoutRepository;

    fn lockout(&self) -> Arc<Self::LockoutRepo> {
        self.lockout.clone()
    }

    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&migrations::all()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::from(e)
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockout_core::{LockoutRepository, LockoutState};

    #[tokio::test]
    async fn test_provider_migrate_twice() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let provider = SqliteRepositoryProvider::new(pool);

        provider.migrate().await.expect("First migration failed");
        provider.migrate().await.expect("Second migration failed");

        let state = LockoutState::new("alice", 4, chrono::Utc::now());
        provider.lockout().put(&state).await.unwrap();
        assert!(provider.lockout().get("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unmigrated_database_reports_storage_error() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let provider = SqliteRepositoryProvider::new(pool);

        provider.health_check().await.expect("Health check failed");
        let error = provider.lockout().get("alice").await.unwrap_err();
        assert!(error.is_storage_error());
    }

    #[tokio::test]
    async fn test_health_check_closed_pool() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let provider = SqliteRepositoryProvider::new(pool.clone());
        pool.close().await;

        assert!(provider.health_check().await.is_err());
    }
}
