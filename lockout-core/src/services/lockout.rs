//! Progressive lockout service.
//!
//! This module implements the lockout engine shared by every limiter
//! instance. An instance is a repository, a [`LockoutConfig`] and a name; the
//! identity-keyed and address-keyed limiters differ only in those.
//!
//! # Features
//!
//! - Per-key failure tracking with lazily created state
//! - Flat or escalating lockout durations
//! - Natural-expiry re-arming and 24 hour decay (escalating policy)
//! - Administrative unlock
//! - Security events for audit and alerting
//! - Background cleanup of stale records (see [`CleanupSweeper`])
//!
//! # Example
//!
//! ```rust,ignore
//! use lockout_core::services::LockoutService;
//! use lockout_core::storage::LockoutConfig;
//!
//! let service = LockoutService::new("address", repository, LockoutConfig::escalating());
//!
//! // Check before verifying credentials
//! let status = service.check("203.0.113.9").await?;
//! if !status.allowed {
//!     // Reject with status.remaining_seconds
//! }
//!
//! // Record the outcome
//! service.record_failure("203.0.113.9").await?;
//! ```

use std::sync::Arc;

use crate::{
    Error,
    clock::{Clock, SystemClock},
    events::{Event, EventBus, UnlockReason},
    policy::{self, PolicyEvent, Transition},
    repositories::LockoutRepository,
    services::sweeper::CleanupSweeper,
    storage::{LockStatus, LockoutConfig, LockoutState, LockoutStatus},
};

/// Service for managing progressive lockout on one key space.
///
/// # Thread Safety
///
/// This service is thread-safe and can be shared across multiple tasks.
/// Per-key read-modify-write is delegated to [`LockoutRepository::update`],
/// which serializes concurrent updates of the same key.
///
/// # Failure semantics
///
/// An absent key is the initial unlocked state, never an error. Storage
/// errors and invariant violations are returned to the caller, which must
/// reject the authentication attempt rather than allow it.
pub struct LockoutService<R: LockoutRepository> {
    name: String,
    repository: Arc<R>,
    config: LockoutConfig,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
}

impl<R: LockoutRepository> LockoutService<R> {
    /// Create a new LockoutService.
    ///
    /// # Arguments
    ///
    /// * `name` - Instance name used in logs and events (e.g. `"identity"`)
    /// * `repository` - The repository implementation for storing state
    /// * `config` - Configuration for lockout behavior
    pub fn new(name: impl Into<String>, repository: Arc<R>, config: LockoutConfig) -> Self {
        Self {
            name: name.into(),
            repository,
            config,
            clock: Arc::new(SystemClock),
            events: None,
        }
    }

    /// Use `clock` for every time comparison.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish lockout events on `events`.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current configuration.
    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Check if the limiter is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Check whether `key` may attempt to authenticate.
    ///
    /// Does not count as an attempt. If a stored lock has run out, the state
    /// is normalized (new grace window, level kept) and written back.
    pub async fn check(&self, key: &str) -> Result<LockoutStatus, Error> {
        if !self.config.enabled {
            return Ok(LockoutStatus::unlocked(key, self.config.max_attempts));
        }

        let now = self.clock.now();
        let config = &self.config;
        let mut rearmed = false;

        let state = self
            .repository
            .update(key, &mut |current: Option<&LockoutState>| {
                let transition =
                    policy::transition(config, key, current, PolicyEvent::Check, now)?;
                rearmed = matches!(transition, Transition::Put(_))
                    && current.is_some_and(|state| state.lock_expired_at(now));
                Ok(transition)
            })
            .await
            .inspect_err(|e| self.log_error("check", key, e))?;

        if rearmed {
            tracing::debug!(
                limiter = %self.name,
                key = %key,
                "Lockout expired, opened new grace window"
            );
            self.emit(Event::Unlocked {
                limiter: self.name.clone(),
                key: key.to_string(),
                reason: UnlockReason::LockoutExpired,
                timestamp: now,
            })
            .await;
        }

        Ok(policy::evaluate(&self.config, key, state.as_ref(), now))
    }

    /// Like [`check`](Self::check), but a locked key is an error.
    ///
    /// Locked keys yield [`Error::RateLimited`] with the remaining lock time,
    /// so callers can reject with `?`.
    pub async fn enforce(&self, key: &str) -> Result<LockoutStatus, Error> {
        let status = self.check(key).await?;
        match status.rejection() {
            Some(rejection) => Err(rejection.into()),
            None => Ok(status),
        }
    }

    /// Record a failed authentication attempt for `key`.
    ///
    /// If protection is disabled, this is a no-op that returns a fresh state
    /// without storing it.
    ///
    /// # Returns
    ///
    /// The updated `LockoutState` after recording the attempt.
    pub async fn record_failure(&self, key: &str) -> Result<LockoutState, Error> {
        let now = self.clock.now();
        if !self.config.enabled {
            return Ok(LockoutState::new(key, self.config.max_attempts, now));
        }

        let config = &self.config;
        let mut was_locked = false;
        let mut rearmed = false;

        let state = self
            .repository
            .update(key, &mut |current: Option<&LockoutState>| {
                was_locked = current.is_some_and(|state| state.is_locked_at(now));
                rearmed = current.is_some_and(|state| state.lock_expired_at(now));
                policy::transition(config, key, current, PolicyEvent::Failure, now)
            })
            .await
            .inspect_err(|e| self.log_error("record_failure", key, e))?
            .ok_or_else(|| {
                let e = Error::InvariantViolation(format!(
                    "failure for key {key} left no stored state"
                ));
                self.log_error("record_failure", key, &e);
                e
            })?;

        if rearmed {
            self.emit(Event::Unlocked {
                limiter: self.name.clone(),
                key: key.to_string(),
                reason: UnlockReason::LockoutExpired,
                timestamp: now,
            })
            .await;
        }

        tracing::debug!(
            limiter = %self.name,
            key = %key,
            attempts_remaining = state.attempts_remaining,
            "Recorded failed attempt"
        );
        self.emit(Event::AttemptFailed {
            limiter: self.name.clone(),
            key: key.to_string(),
            attempts_remaining: state.attempts_remaining,
            timestamp: now,
        })
        .await;

        if let Some(locked_until) = state.locked_until.filter(|_| !was_locked) {
            tracing::info!(
                limiter = %self.name,
                key = %key,
                lockout_level = state.lockout_level,
                locked_until = %locked_until,
                "Key locked after repeated failed attempts"
            );
            self.emit(Event::Locked {
                limiter: self.name.clone(),
                key: key.to_string(),
                lockout_level: state.lockout_level,
                locked_until,
                timestamp: now,
            })
            .await;
        }

        Ok(state)
    }

    /// Clear all state for `key` after a successful authentication.
    pub async fn record_success(&self, key: &str) -> Result<(), Error> {
        if !self.config.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let config = &self.config;
        let mut existed = false;

        self.repository
            .update(key, &mut |current: Option<&LockoutState>| {
                existed = current.is_some();
                policy::transition(config, key, current, PolicyEvent::Success, now)
            })
            .await
            .inspect_err(|e| self.log_error("record_success", key, e))?;

        if existed {
            tracing::debug!(limiter = %self.name, key = %key, "Cleared lockout state");
            self.emit(Event::Unlocked {
                limiter: self.name.clone(),
                key: key.to_string(),
                reason: UnlockReason::Success,
                timestamp: now,
            })
            .await;
        }

        Ok(())
    }

    /// Read-only lock view of `key`.
    ///
    /// Never reports `locked` past `locked_until`, even if the stored state
    /// has not been normalized yet.
    pub async fn status(&self, key: &str) -> Result<LockStatus, Error> {
        if !self.config.enabled {
            return Ok(LockStatus {
                locked: false,
                remaining_seconds: None,
            });
        }

        let now = self.clock.now();
        let state = self
            .repository
            .get(key)
            .await
            .inspect_err(|e| self.log_error("status", key, e))?;

        Ok(policy::lock_status(state.as_ref(), now))
    }

    /// Check if a key is currently locked (convenience method).
    pub async fn is_locked(&self, key: &str) -> Result<bool, Error> {
        Ok(self.status(key).await?.locked)
    }

    /// Unlock a key regardless of its state (e.g. support request).
    ///
    /// # Returns
    ///
    /// `true` if the key was locked, `false` otherwise.
    pub async fn unlock(&self, key: &str) -> Result<bool, Error> {
        let now = self.clock.now();
        let mut existed = false;
        let mut was_locked = false;

        self.repository
            .update(key, &mut |current: Option<&LockoutState>| {
                existed = current.is_some();
                was_locked = current.is_some_and(|state| state.is_locked_at(now));
                Ok(if existed {
                    Transition::Delete
                } else {
                    Transition::Unchanged
                })
            })
            .await
            .inspect_err(|e| self.log_error("unlock", key, e))?;

        if existed {
            tracing::info!(
                limiter = %self.name,
                key = %key,
                was_locked = was_locked,
                "Lockout state cleared by administrator"
            );
            self.emit(Event::Unlocked {
                limiter: self.name.clone(),
                key: key.to_string(),
                reason: UnlockReason::AdminAction,
                timestamp: now,
            })
            .await;
        }

        Ok(was_locked)
    }

    /// A cleanup sweeper sharing this service's repository, clock and retention settings.
    pub fn sweeper(&self) -> CleanupSweeper<R> {
        CleanupSweeper::new(
            self.name.clone(),
            Arc::clone(&self.repository),
            self.config.retention_period,
            self.config.cleanup_interval,
        )
        .with_clock(Arc::clone(&self.clock))
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.emit(&event).await {
                tracing::warn!(limiter = %self.name, error = %e, "Failed to emit lockout event");
            }
        }
    }

    fn log_error(&self, operation: &str, key: &str, error: &Error) {
        if error.is_invariant_violation() {
            tracing::error!(
                limiter = %self.name,
                key = %key,
                operation = operation,
                error = %error,
                "Lockout state invariant violated"
            );
        } else {
            tracing::error!(
                limiter = %self.name,
                key = %key,
                operation = operation,
                error = %error,
                "Lockout storage operation failed"
            );
        }
    }
}
