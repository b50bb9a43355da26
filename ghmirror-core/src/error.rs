use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for sync operations.
///
/// The variants drive retry policy: `RateLimited` causes a wait until the
/// quota resets, `Transient` is retried with bounded backoff, `Fatal` is
/// never retried, `MalformedRecord` aborts a single record while the run
/// continues, `Commit` aborts the current batch leaving the cursor unchanged.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("transient error: {message}")]
    Transient { message: String },

    #[error("fatal error (status {status}): {message}")]
    Fatal { status: u16, message: String },

    #[error("malformed record: missing or invalid field `{field}`")]
    MalformedRecord { field: &'static str },

    #[error("batch commit failed: {message}")]
    Commit { message: String },

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        SyncError::Transient {
            message: message.into(),
        }
    }

    pub fn fatal<S: Into<String>>(status: u16, message: S) -> Self {
        SyncError::Fatal {
            status,
            message: message.into(),
        }
    }

    pub fn commit<S: Into<String>>(message: S) -> Self {
        SyncError::Commit {
            message: message.into(),
        }
    }

    /// Whether bounded retry may recover from this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }
}

/// Detect a unique-constraint violation from the storage layer.
///
/// Concurrent writers racing on shared user/label rows surface as unique
/// violations; those are idempotent no-ops rather than failures.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                return true;
            }
            // SQLite extended result codes for primary key / unique conflicts
            matches!(db_err.code().as_deref(), Some("1555") | Some("2067"))
        }
        _ => false,
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
