//! Repository trait for lockout state.
//!
//! This module defines the storage interface the lockout engine reads and
//! writes through. It knows nothing about policy: it stores one
//! [`LockoutState`] per key and applies policy decisions atomically.

use async_trait::async_trait;

use crate::{Error, policy::Transition, storage::LockoutState};

/// Repository for lockout state, keyed by identity or source address.
///
/// # Concurrency
///
/// Read-modify-write on one key must never lose an update. [`update`] is the
/// only path the engine uses for mutations; implementations serialize it per
/// key (a shard lock, a row lock, or compare-and-swap with retry) and must not
/// block unrelated keys for longer than one record.
///
/// [`update`]: LockoutRepository::update
#[async_trait]
pub trait LockoutRepository: Send + Sync + 'static {
    /// Fetch the state stored for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<LockoutState>, Error>;

    /// Store `state` under `state.key`, overwriting any previous state.
    async fn put(&self, state: &LockoutState) -> Result<(), Error>;

    /// Remove the state for `key`.
    ///
    /// # Returns
    ///
    /// `true` if a state was removed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// Visit a snapshot of every stored state.
    ///
    /// Used by the cleanup sweeper to find stale records. The visitor must be
    /// cheap; implementations may hold internal locks while calling it.
    async fn for_each(
        &self,
        visit: &mut (dyn for<'s> FnMut(&'s LockoutState) + Send),
    ) -> Result<(), Error>;

    /// Atomically apply a policy decision to the state for `key`.
    ///
    /// `apply` receives the current state and returns the [`Transition`] to
    /// perform. It may be called more than once if a concurrent writer wins a
    /// race, so it must not have side effects beyond its return value and
    /// captured flags it overwrites on each call.
    ///
    /// # Returns
    ///
    /// The state stored for `key` after the update, or `None` if there is none.
    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn for<'s> FnMut(Option<&'s LockoutState>) -> Result<Transition, Error> + Send),
    ) -> Result<Option<LockoutState>, Error>;
}
