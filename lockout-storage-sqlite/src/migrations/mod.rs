//! SQLite schema for lockout state.

use async_trait::async_trait;
use chrono::Utc;
use lockout_migration::{Migration, MigrationError, MigrationManager, MigrationRecord};
use sqlx::{Database, Sqlite, SqlitePool};

/// Applies [`Migration`]s to a SQLite pool and records them in the tracking table.
pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Every migration of this backend, in version order.
pub fn all() -> Vec<Box<dyn Migration<Sqlite>>> {
    vec![
        Box::new(CreateLockoutStatesTable),
        Box::new(CreateLockoutStatesLastAttemptIndex),
    ]
}

#[async_trait]
impl MigrationManager<Sqlite> for SqliteMigrationManager {
    async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if !self.is_applied(migration.version()).await? {
                let mut tx = self.pool.begin().await?;

                tracing::info!(
                    version = migration.version(),
                    name = migration.name(),
                    "Applying migration"
                );

                migration
                    .up(&mut *tx as &mut <Sqlite as Database>::Connection)
                    .await?;

                sqlx::query(
                    format!(
                        "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                        self.get_migration_table_name()
                    )
                    .as_str(),
                )
                .bind(migration.version())
                .bind(migration.name())
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn down(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                let mut tx = self.pool.begin().await?;

                tracing::info!(
                    version = migration.version(),
                    name = migration.name(),
                    "Rolling back migration"
                );

                migration
                    .down(&mut *tx as &mut <Sqlite as Database>::Connection)
                    .await?;

                sqlx::query(
                    format!(
                        "DELETE FROM {} WHERE version = ?",
                        self.get_migration_table_name()
                    )
                    .as_str(),
                )
                .bind(migration.version())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!(
                "SELECT version, name, applied_at FROM {}",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let result: bool = sqlx::query_scalar(
            format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

/// One row per tracked key. Timestamps are unix seconds; `version` is bumped on
/// every write for compare-and-swap updates.
pub struct CreateLockoutStatesTable;

#[async_trait]
impl Migration<Sqlite> for CreateLockoutStatesTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateLockoutStatesTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lockout_states (
                key TEXT PRIMARY KEY,
                attempts_remaining INTEGER NOT NULL CHECK (attempts_remaining >= 0),
                lockout_level INTEGER NOT NULL DEFAULT 0 CHECK (lockout_level >= 0),
                locked_until INTEGER,
                last_attempt_at INTEGER NOT NULL,
                window_started_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS lockout_states")
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Supports the sweeper's scan for inactive records.
pub struct CreateLockoutStatesLastAttemptIndex;

#[async_trait]
impl Migration<Sqlite> for CreateLockoutStatesLastAttemptIndex {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateLockoutStatesLastAttemptIndex"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_lockout_states_last_attempt_at ON lockout_states(last_attempt_at)",
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP INDEX IF EXISTS idx_lockout_states_last_attempt_at")
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (SqlitePool, SqliteMigrationManager) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        let manager = SqliteMigrationManager::new(pool.clone());
        manager
            .initialize()
            .await
            .expect("Failed to initialize migrations");
        (pool, manager)
    }

    #[tokio::test]
    async fn test_up_applies_all_and_is_idempotent() {
        let (pool, manager) = setup().await;
        let migrations = all();

        manager.up(&migrations).await.expect("Failed to run migrations");
        manager.up(&migrations).await.expect("Re-running migrations failed");

        let applied = manager.get_applied_migrations().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert!(manager.is_applied(1).await.unwrap());
        assert!(manager.is_applied(2).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lockout_states")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_down_removes_table() {
        let (pool, manager) = setup().await;
        let mut migrations = all();
        manager.up(&migrations).await.unwrap();

        migrations.reverse();
        manager.down(&migrations).await.expect("Failed to roll back");

        assert!(!manager.is_applied(1).await.unwrap());
        let result = sqlx::query("SELECT 1 FROM lockout_states")
            .fetch_optional(&pool)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tracking_table_name() {
        let (_, manager) = setup().await;
        assert_eq!(
            MigrationManager::<Sqlite>::get_migration_table_name(&manager),
            "_lockout_migrations"
        );
    }
}
