//! Repository traits for data access layer
//!
//! This module defines the repository interface the lockout engine uses to
//! interact with storage, plus the in-memory implementation.
//!
//! Storage backends expose their repository through [`RepositoryProvider`],
//! which also carries the lifecycle methods (migrations, health checks) the
//! facade calls at startup.

pub mod lockout;
pub mod memory;

pub use lockout::LockoutRepository;
pub use memory::MemoryLockoutRepository;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;

/// Provider trait that storage implementations implement to hand out their
/// lockout repository.
///
/// # Example
///
/// ```rust,ignore
/// use lockout_core::repositories::*;
///
/// struct MyStorage { lockout: Arc<MyLockoutRepository> }
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     type LockoutRepo = MyLockoutRepository;
///     fn lockout(&self) -> Arc<Self::LockoutRepo> { self.lockout.clone() }
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: Send + Sync + 'static {
    /// The lockout repository implementation type
    type LockoutRepo: LockoutRepository;

    /// Get a shared handle to the lockout repository
    fn lockout(&self) -> Arc<Self::LockoutRepo>;

    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}

/// Repository provider for process-local state.
#[derive(Debug, Default)]
pub struct MemoryRepositoryProvider {
    lockout: Arc<MemoryLockoutRepository>,
}

impl MemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryProvider for MemoryRepositoryProvider {
    type LockoutRepo = MemoryLockoutRepository;

    fn lockout(&self) -> Arc<Self::LockoutRepo> {
        self.lockout.clone()
    }

    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
