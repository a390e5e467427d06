use std::future::Future;
use std::time::Duration;

use crate::{Error, error::StorageError};

/// Maps a failed decode or driver result into [`StorageError::Database`].
///
/// ```rust,ignore
/// use lockout_core::error::utilities::DatabaseResultExt;
///
/// u32::try_from(raw).map_db_err_with_context("Invalid attempts_remaining")?;
/// ```
pub trait DatabaseResultExt<T> {
    /// Convert the error, prefixing it with `context`.
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(format!("{context}: {e}"))))
    }
}

/// Run a storage future with an upper bound on its duration.
///
/// Elapsed deadlines surface as [`StorageError::Timeout`], which callers treat
/// as a transient failure of the current attempt.
pub async fn with_timeout<T, F>(limit: Duration, future: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Storage(StorageError::Timeout(limit))),
    }
}
