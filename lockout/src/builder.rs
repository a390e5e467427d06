//! Builder pattern for constructing LoginGuard instances
//!
//! This module provides a type-safe builder for creating [`LoginGuard`]
//! instances with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use lockout::LoginGuardBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let guard = LoginGuardBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or build without auto-migration and run manually
//!     let guard = LoginGuardBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .build()
//!         .await?;
//!     guard.migrate().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use lockout_core::{
    Clock, DurationSchedule, EventBus, LockoutConfig, LockoutService, MemoryLockoutRepository,
    MemoryRepositoryProvider, RepositoryProvider,
};

use crate::LoginGuard;

/// Errors that can occur when building a LoginGuard instance.
#[derive(Debug, thiserror::Error)]
pub enum LoginGuardBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`LoginGuardBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

/// A type-safe builder for constructing [`LoginGuard`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build or add more configuration
///
/// The durable store only holds address-keyed state. Identity-keyed state is
/// always kept in memory.
pub struct LoginGuardBuilder<Storage> {
    storage: Storage,
    address_config: LockoutConfig,
    identity_config: LockoutConfig,
    clock: Option<Arc<dyn Clock>>,
    events: Option<EventBus>,
    apply_migrations: bool,
}

impl Default for LoginGuardBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginGuardBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Address limiter: 5 attempts, then 2 after each lock, escalating durations
    /// - Identity limiter: 5 attempts, 15 minute lockout
    /// - Clock: system clock
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            address_config: LockoutConfig::escalating(),
            identity_config: LockoutConfig::identity_default(),
            clock: None,
            events: None,
            apply_migrations: false,
        }
    }

    /// Keep address-keyed state in memory. State is lost on restart.
    pub fn with_memory(self) -> LoginGuardBuilder<WithStorage<MemoryRepositoryProvider>> {
        self.with_repositories(Arc::new(MemoryRepositoryProvider::new()))
    }

    /// Use any [`RepositoryProvider`] for address-keyed state.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> LoginGuardBuilder<WithStorage<R>> {
        LoginGuardBuilder {
            storage: WithStorage { repositories },
            address_config: self.address_config,
            identity_config: self.identity_config,
            clock: self.clock,
            events: self.events,
            apply_migrations: self.apply_migrations,
        }
    }
}

#[cfg(feature = "sqlite")]
impl LoginGuardBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<LoginGuardBuilder<WithStorage<crate::SqliteRepositoryProvider>>, LoginGuardBuilderError>
    {
        let storage = crate::SqliteStorage::connect(url)
            .await
            .map_err(|e| LoginGuardBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repositories(Arc::new(storage.into_repository_provider())))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use lockout::LoginGuardBuilder;
    /// use sqlx::SqlitePool;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = SqlitePool::connect("sqlite::memory:").await?;
    ///
    /// let guard = LoginGuardBuilder::new()
    ///     .with_sqlite_pool(pool)
    ///     .apply_migrations(true)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> LoginGuardBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

impl<R: RepositoryProvider> LoginGuardBuilder<WithStorage<R>> {
    /// Configure the address-keyed limiter.
    ///
    /// Default: [`LockoutConfig::escalating`]
    pub fn with_address_config(mut self, config: LockoutConfig) -> Self {
        self.address_config = config;
        self
    }

    /// Configure the identity-keyed limiter.
    ///
    /// Default: [`LockoutConfig::identity_default`]
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use lockout::{LoginGuardBuilder, LockoutConfig};
    /// use chrono::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let guard = LoginGuardBuilder::new()
    ///     .with_memory()
    ///     .with_identity_config(LockoutConfig::flat(3, Duration::minutes(30)))
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_identity_config(mut self, config: LockoutConfig) -> Self {
        self.identity_config = config;
        self
    }

    /// Use `clock` for every lockout decision.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish lockout events from both limiters on `events`.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the LoginGuard instance.
    ///
    /// If `apply_migrations(true)` was called, migrations will be applied
    /// before returning.
    pub async fn build(self) -> Result<LoginGuard<R>, LoginGuardBuilderError> {
        validate_config("address", &self.address_config)?;
        validate_config("identity", &self.identity_config)?;

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| LoginGuardBuilderError::Migration(e.to_string()))?;
        }

        let mut address = LockoutService::new(
            "address",
            self.storage.repositories.lockout(),
            self.address_config,
        );
        let mut identity = LockoutService::new(
            "identity",
            Arc::new(MemoryLockoutRepository::new()),
            self.identity_config,
        );

        if let Some(clock) = self.clock {
            address = address.with_clock(Arc::clone(&clock));
            identity = identity.with_clock(clock);
        }
        if let Some(events) = self.events {
            address = address.with_event_bus(events.clone());
            identity = identity.with_event_bus(events);
        }

        Ok(LoginGuard::from_parts(
            self.storage.repositories,
            address,
            identity,
        ))
    }
}

fn validate_config(name: &str, config: &LockoutConfig) -> Result<(), LoginGuardBuilderError> {
    if !config.enabled {
        return Ok(());
    }
    if config.max_attempts == 0 || config.rearm_attempts == 0 {
        return Err(LoginGuardBuilderError::InvalidConfiguration(format!(
            "{name} limiter must allow at least one attempt"
        )));
    }
    if let DurationSchedule::Escalating(steps) = &config.schedule {
        if steps.is_empty() {
            return Err(LoginGuardBuilderError::InvalidConfiguration(format!(
                "{name} limiter has an empty lockout schedule"
            )));
        }
    }
    if config.cleanup_interval.is_zero() {
        return Err(LoginGuardBuilderError::InvalidConfiguration(format!(
            "{name} limiter cleanup interval must be positive"
        )));
    }
    Ok(())
}
