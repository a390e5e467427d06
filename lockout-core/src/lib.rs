//! Core functionality for progressive login lockout
//!
//! This crate contains the state model, the pure lockout policy and the engine
//! that applies it through a storage-agnostic repository.
//!
//! Two limiter instances are normally run side by side: an identity-keyed one
//! with a flat policy and an address-keyed one with escalating lock durations.
//! Both are a [`LockoutService`] configured with a different
//! [`LockoutConfig`].
//!
//! See [`LockoutState`] for the stored record, [`policy`] for the transition
//! rules, and [`LockoutRepository`] for the storage contract backends implement.
pub mod clock;
pub mod error;
pub mod events;
pub mod policy;
pub mod repositories;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, EventError, LockoutError, StorageError};
pub use events::{Event, EventBus, EventHandler, UnlockReason};
pub use policy::{PolicyEvent, Transition};
pub use repositories::{
    LockoutRepository, MemoryLockoutRepository, MemoryRepositoryProvider, RepositoryProvider,
};
pub use services::{CleanupSweeper, LockoutService, SweeperHandle};
pub use storage::{
    DecayRule, DurationSchedule, LockStatus, LockoutConfig, LockoutState, LockoutStatus,
};
