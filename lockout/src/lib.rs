//! # Lockout
//!
//! Progressive login lockout for Rust services. Two limiters guard every
//! authentication attempt:
//!
//! - an **address-keyed** limiter with escalating lock durations
//!   (1, 3, 5, 10 ... minutes, doubling past 32 hours) and 24 hour decay,
//!   backed by durable storage so locks survive restarts
//! - an **identity-keyed** limiter with a flat 5 attempts / 15 minutes policy,
//!   kept in memory
//!
//! The address limiter is consulted first. A successful login clears both.
//!
//! ## Storage Support
//!
//! - SQLite (feature `sqlite`, enabled by default)
//! - In-memory, for tests and single-process deployments
//!
//! ## Example
//!
//! ```rust,no_run
//! use lockout::{LoginGuardBuilder, LoginOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let guard = LoginGuardBuilder::new()
//!         .with_sqlite("sqlite://lockout.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let outcome = guard
//!         .authenticate("203.0.113.9", "alice", async { Ok::<_, std::io::Error>(false) })
//!         .await?;
//!     assert!(matches!(outcome, LoginOutcome::InvalidCredentials { .. }));
//!     Ok(())
//! }
//! ```
use std::future::Future;
use std::sync::Arc;

pub mod builder;

pub use builder::{LoginGuardBuilder, LoginGuardBuilderError, NoStorage, WithStorage};

/// Re-export core types from lockout_core
pub use lockout_core::{
    Clock, DecayRule, DurationSchedule, Error, Event, EventBus, EventHandler, LockStatus,
    LockoutConfig, LockoutRepository, LockoutService, LockoutState, LockoutStatus, ManualClock,
    MemoryLockoutRepository, MemoryRepositoryProvider, RepositoryProvider, SweeperHandle,
    SystemClock, UnlockReason,
};

/// Re-export storage backends
#[cfg(feature = "sqlite")]
pub use lockout_storage_sqlite::{SqliteLockoutRepository, SqliteRepositoryProvider, SqliteStorage};

/// Result of consulting both limiters before an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginDecision {
    /// Both limiters allow the attempt
    Allowed {
        address: LockoutStatus,
        identity: LockoutStatus,
    },
    /// A limiter refused. The identity limiter is not consulted when the
    /// address is locked.
    Denied(LockoutStatus),
}

impl LoginDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LoginDecision::Allowed { .. })
    }
}

/// Result of a completed authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials were valid; both limiters were reset
    Authenticated,
    /// Credentials were invalid; the failure was counted on both limiters
    InvalidCredentials {
        address: LockoutState,
        identity: LockoutState,
    },
}

impl LoginOutcome {
    /// Whether the failure just recorded locked either key.
    pub fn locked(&self) -> bool {
        match self {
            LoginOutcome::Authenticated => false,
            LoginOutcome::InvalidCredentials { address, identity } => {
                address.locked_until.is_some() || identity.locked_until.is_some()
            }
        }
    }
}

/// Errors from [`LoginGuard::authenticate`].
///
/// Every variant means the attempt must be refused.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// A limiter refused the attempt
    #[error("Too many failed attempts for {}, retry later", .0.key)]
    RateLimited(LockoutStatus),

    /// Lockout state could not be read or written
    #[error("Lockout check failed: {0}")]
    Lockout(#[from] Error),

    /// The caller's credential verification failed
    #[error("Credential verification failed: {0}")]
    Verification(E),
}

impl<E> GuardError<E> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GuardError::RateLimited(_))
    }

    /// The lock that refused the attempt, if any.
    pub fn status(&self) -> Option<&LockoutStatus> {
        match self {
            GuardError::RateLimited(status) => Some(status),
            _ => None,
        }
    }
}

/// Handles to the running cleanup sweepers of a [`LoginGuard`].
#[derive(Debug)]
pub struct SweeperHandles {
    address: SweeperHandle,
    identity: SweeperHandle,
}

impl SweeperHandles {
    /// Stop both sweepers and wait for them.
    pub async fn stop(self) {
        self.address.stop().await;
        self.identity.stop().await;
    }
}

/// Pairs the address-keyed and identity-keyed limiters around a login flow.
///
/// # Example
///
/// ```rust,no_run
/// use lockout::{LoginGuard, LoginDecision, MemoryRepositoryProvider};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), lockout::Error> {
/// let guard = LoginGuard::new(Arc::new(MemoryRepositoryProvider::new()));
///
/// match guard.check("203.0.113.9", "alice").await? {
///     LoginDecision::Allowed { .. } => { /* verify credentials */ }
///     LoginDecision::Denied(status) => {
///         println!("locked for {:?} more seconds", status.remaining_seconds);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct LoginGuard<R: RepositoryProvider> {
    repositories: Arc<R>,
    address: LockoutService<R::LockoutRepo>,
    identity: LockoutService<MemoryLockoutRepository>,
}

impl<R: RepositoryProvider> LoginGuard<R> {
    /// Create a guard with default policies: escalating for addresses on
    /// `repositories`, flat for identities in memory.
    pub fn new(repositories: Arc<R>) -> Self {
        let address = LockoutService::new(
            "address",
            repositories.lockout(),
            LockoutConfig::escalating(),
        );
        let identity = LockoutService::new(
            "identity",
            Arc::new(MemoryLockoutRepository::new()),
            LockoutConfig::identity_default(),
        );
        Self::from_parts(repositories, address, identity)
    }

    pub(crate) fn from_parts(
        repositories: Arc<R>,
        address: LockoutService<R::LockoutRepo>,
        identity: LockoutService<MemoryLockoutRepository>,
    ) -> Self {
        Self {
            repositories,
            address,
            identity,
        }
    }

    /// The address-keyed limiter, for administrative unlocks and status queries.
    pub fn address_limiter(&self) -> &LockoutService<R::LockoutRepo> {
        &self.address
    }

    /// The identity-keyed limiter.
    pub fn identity_limiter(&self) -> &LockoutService<MemoryLockoutRepository> {
        &self.identity
    }

    /// Consult the address limiter, then the identity limiter.
    pub async fn check(&self, address: &str, identity: &str) -> Result<LoginDecision, Error> {
        let address_status = self.address.check(address).await?;
        if !address_status.allowed {
            tracing::debug!(address = %address, "Login refused, address locked");
            return Ok(LoginDecision::Denied(address_status));
        }

        let identity_status = self.identity.check(identity).await?;
        if !identity_status.allowed {
            tracing::debug!(identity = %identity, "Login refused, identity locked");
            return Ok(LoginDecision::Denied(identity_status));
        }

        Ok(LoginDecision::Allowed {
            address: address_status,
            identity: identity_status,
        })
    }

    /// Count a failed login against both limiters.
    pub async fn record_failure(&self, address: &str, identity: &str) -> Result<LoginOutcome, Error> {
        let address = self.address.record_failure(address).await?;
        let identity = self.identity.record_failure(identity).await?;
        Ok(LoginOutcome::InvalidCredentials { address, identity })
    }

    /// Reset both limiters after a successful login.
    pub async fn record_success(&self, address: &str, identity: &str) -> Result<(), Error> {
        self.address.record_success(address).await?;
        self.identity.record_success(identity).await?;
        Ok(())
    }

    /// Run one guarded authentication attempt.
    ///
    /// `verify` is only awaited if both limiters allow the attempt. It
    /// resolves to `Ok(true)` for valid credentials, `Ok(false)` for invalid
    /// ones. A verification error is returned without counting an attempt.
    pub async fn authenticate<F, E>(
        &self,
        address: &str,
        identity: &str,
        verify: F,
    ) -> Result<LoginOutcome, GuardError<E>>
    where
        F: Future<Output = Result<bool, E>>,
    {
        if let LoginDecision::Denied(status) = self.check(address, identity).await? {
            return Err(GuardError::RateLimited(status));
        }

        if verify.await.map_err(GuardError::Verification)? {
            self.record_success(address, identity).await?;
            Ok(LoginOutcome::Authenticated)
        } else {
            let outcome = self.record_failure(address, identity).await?;
            if outcome.locked() {
                tracing::info!(
                    address = %address,
                    identity = %identity,
                    "Login attempt locked a limiter"
                );
            }
            Ok(outcome)
        }
    }

    /// Start the background cleanup sweepers for both limiters.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweepers(&self) -> SweeperHandles {
        SweeperHandles {
            address: self.address.sweeper().start(),
            identity: self.identity.sweeper().start(),
        }
    }

    /// Run migrations for the durable store
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Health check for the durable store
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }
}
