pub mod utilities;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit error: {0}")]
    RateLimited(#[from] LockoutError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Error)]
pub enum LockoutError {
    #[error("Too many failed attempts for {key}, retry in {remaining_seconds} seconds")]
    RateLimitExceeded {
        key: String,
        locked_until: DateTime<Utc>,
        remaining_seconds: i64,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Concurrent update conflict on key {0}")]
    Conflict(String),
}

/// Returned by an [`EventHandler`](crate::events::EventHandler) that could not
/// process an event.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event handler error: {0}")]
    HandlerError(String),
}

impl Error {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// Errors the caller may retry later. The current attempt must still be rejected.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(
                StorageError::Database(_)
                    | StorageError::Connection(_)
                    | StorageError::Timeout(_)
                    | StorageError::Conflict(_)
            )
        )
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}
