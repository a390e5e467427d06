//! SQLite implementation of the lockout repository.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lockout_core::{
    Error,
    error::{
        StorageError,
        utilities::{DatabaseResultExt, with_timeout},
    },
    policy::Transition,
    repositories::LockoutRepository,
    storage::LockoutState,
};
use sqlx::SqlitePool;

/// Upper bound on any single statement
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Compare-and-swap attempts before giving up with [`StorageError::Conflict`]
const DEFAULT_MAX_RETRIES: u32 = 16;

/// SQLite repository for lockout state.
///
/// Updates are optimistic: the row is read with its `version`, the policy
/// decision is computed, and the write only applies if the version is
/// unchanged. A lost race re-reads and re-applies the decision.
pub struct SqliteLockoutRepository {
    pool: SqlitePool,
    timeout: Duration,
    max_retries: u32,
}

impl SqliteLockoutRepository {
    /// Create a new SQLite lockout repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Bound every statement by `timeout`. Elapsed statements fail with
    /// [`StorageError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn fetch(&self, key: &str) -> Result<Option<(LockoutState, i64)>, Error> {
        let row = with_timeout(self.timeout, async {
            sqlx::query_as::<_, SqliteLockoutState>(
                r#"
                SELECT key, attempts_remaining, lockout_level, locked_until,
                       last_attempt_at, window_started_at, version
                FROM lockout_states
                WHERE key = ?
                "#,
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to get lockout state"))
        })
        .await?;

        row.map(|row| {
            let version = row.version;
            LockoutState::try_from(row).map(|state| (state, version))
        })
        .transpose()
    }

    /// Insert `state` unless the key already exists. Returns whether it was inserted.
    async fn insert_new(&self, state: &LockoutState) -> Result<bool, Error> {
        let result = with_timeout(self.timeout, async {
            sqlx::query(
                r#"
                INSERT INTO lockout_states
                    (key, attempts_remaining, lockout_level, locked_until,
                     last_attempt_at, window_started_at, version)
                VALUES (?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(key) DO NOTHING
                "#,
            )
            .bind(&state.key)
            .bind(i64::from(state.attempts_remaining))
            .bind(i64::from(state.lockout_level))
            .bind(state.locked_until.map(|dt| dt.timestamp()))
            .bind(state.last_attempt_at.timestamp())
            .bind(state.window_started_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to insert lockout state"))
        })
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Overwrite the row for `state.key` if it is still at `version`.
    async fn replace_if_version(&self, state: &LockoutState, version: i64) -> Result<bool, Error> {
        let result = with_timeout(self.timeout, async {
            sqlx::query(
                r#"
                UPDATE lockout_states
                SET attempts_remaining = ?,
                    lockout_level = ?,
                    locked_until = ?,
                    last_attempt_at = ?,
                    window_started_at = ?,
                    version = version + 1
                WHERE key = ? AND version = ?
                "#,
            )
            .bind(i64::from(state.attempts_remaining))
            .bind(i64::from(state.lockout_level))
            .bind(state.locked_until.map(|dt| dt.timestamp()))
            .bind(state.last_attempt_at.timestamp())
            .bind(state.window_started_at.timestamp())
            .bind(&state.key)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to update lockout state"))
        })
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_if_version(&self, key: &str, version: i64) -> Result<bool, Error> {
        let result = with_timeout(self.timeout, async {
            sqlx::query("DELETE FROM lockout_states WHERE key = ? AND version = ?")
                .bind(key)
                .bind(version)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_error(e, "Failed to delete lockout state"))
        })
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteLockoutState {
    key: String,
    attempts_remaining: i64,
    lockout_level: i64,
    locked_until: Option<i64>,
    last_attempt_at: i64,
    window_started_at: i64,
    version: i64,
}

impl TryFrom<SqliteLockoutState> for LockoutState {
    type Error = Error;

    fn try_from(row: SqliteLockoutState) -> Result<Self, Self::Error> {
        let locked_until = row
            .locked_until
            .map(|ts| timestamp(&row.key, "locked_until", ts))
            .transpose()?;

        Ok(LockoutState {
            attempts_remaining: counter(&row.key, "attempts_remaining", row.attempts_remaining)?,
            lockout_level: counter(&row.key, "lockout_level", row.lockout_level)?,
            locked_until,
            last_attempt_at: timestamp(&row.key, "last_attempt_at", row.last_attempt_at)?,
            window_started_at: timestamp(&row.key, "window_started_at", row.window_started_at)?,
            key: row.key,
        })
    }
}

fn timestamp(key: &str, column: &str, value: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(value, 0).ok_or_else(|| {
        tracing::error!(key = %key, column = column, value = value, "Invalid stored timestamp");
        Error::Storage(StorageError::Database(format!(
            "Invalid {column} timestamp for key {key}"
        )))
    })
}

fn counter(key: &str, column: &str, value: i64) -> Result<u32, Error> {
    u32::try_from(value)
        .inspect_err(|_| {
            tracing::error!(key = %key, column = column, value = value, "Invalid stored counter");
        })
        .map_db_err_with_context(&format!("Invalid {column} value for key {key}"))
}

fn storage_error(e: sqlx::Error, context: &str) -> Error {
    tracing::error!(error = %e, "{context}");
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::Storage(StorageError::Connection(context.to_string()))
        }
        _ => Error::Storage(StorageError::Database(context.to_string())),
    }
}

#[async_trait]
impl LockoutRepository for SqliteLockoutRepository {
    async fn get(&self, key: &str) -> Result<Option<LockoutState>, Error> {
        Ok(self.fetch(key).await?.map(|(state, _)| state))
    }

    async fn put(&self, state: &LockoutState) -> Result<(), Error> {
        with_timeout(self.timeout, async {
            sqlx::query(
                r#"
                INSERT INTO lockout_states
                    (key, attempts_remaining, lockout_level, locked_until,
                     last_attempt_at, window_started_at, version)
                VALUES (?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(key) DO UPDATE SET
                    attempts_remaining = excluded.attempts_remaining,
                    lockout_level = excluded.lockout_level,
                    locked_until = excluded.locked_until,
                    last_attempt_at = excluded.last_attempt_at,
                    window_started_at = excluded.window_started_at,
                    version = lockout_states.version + 1
                "#,
            )
            .bind(&state.key)
            .bind(i64::from(state.attempts_remaining))
            .bind(i64::from(state.lockout_level))
            .bind(state.locked_until.map(|dt| dt.timestamp()))
            .bind(state.last_attempt_at.timestamp())
            .bind(state.window_started_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to store lockout state"))
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let result = with_timeout(self.timeout, async {
            sqlx::query("DELETE FROM lockout_states WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_error(e, "Failed to delete lockout state"))
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn for_each(
        &self,
        visit: &mut (dyn for<'s> FnMut(&'s LockoutState) + Send),
    ) -> Result<(), Error> {
        let rows = with_timeout(self.timeout, async {
            sqlx::query_as::<_, SqliteLockoutState>(
                r#"
                SELECT key, attempts_remaining, lockout_level, locked_until,
                       last_attempt_at, window_started_at, version
                FROM lockout_states
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to list lockout states"))
        })
        .await?;

        for row in rows {
            match LockoutState::try_from(row) {
                Ok(state) => visit(&state),
                // One corrupt row must not stop the sweep of the others
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable lockout state"),
            }
        }
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn for<'s> FnMut(Option<&'s LockoutState>) -> Result<Transition, Error> + Send),
    ) -> Result<Option<LockoutState>, Error> {
        for attempt in 0..=self.max_retries {
            let current = self.fetch(key).await?;

            let applied = match (apply(current.as_ref().map(|(state, _)| state))?, current) {
                (Transition::Unchanged, current) => return Ok(current.map(|(state, _)| state)),
                (Transition::Delete, None) => return Ok(None),
                (Transition::Put(state), None) => self
                    .insert_new(&state)
                    .await?
                    .then_some(Some(state)),
                (Transition::Put(state), Some((_, version))) => self
                    .replace_if_version(&state, version)
                    .await?
                    .then_some(Some(state)),
                (Transition::Delete, Some((_, version))) => self
                    .delete_if_version(key, version)
                    .await?
                    .then_some(None),
            };

            if let Some(stored) = applied {
                return Ok(stored);
            }

            tracing::debug!(key = %key, attempt = attempt, "Lockout state changed concurrently, retrying");
        }

        tracing::warn!(key = %key, retries = self.max_retries, "Gave up updating contended lockout state");
        Err(Error::Storage(StorageError::Conflict(key.to_string())))
    }
}
