//! Error types for feedsync.

use thiserror::Error;

use crate::feed::validator::ValidationError;

/// Common error type for feedsync.
#[derive(Error, Debug)]
pub enum FeedsyncError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The feed URL was rejected before any request was made.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The remote source could not be reached (connection failure, timeout).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The remote document could not be used as a feed.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// The parsed feed violated an acceptance rule.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// The owner already follows this URL.
    #[error("already following {0}")]
    AlreadyFollowing(String),

    /// A sync for this feed is already running or waiting for a retry.
    #[error("feed {0} is already syncing")]
    SyncInProgress(i64),

    /// A failure notification could not be delivered.
    #[error("notification error: {0}")]
    Notify(String),
}

impl FeedsyncError {
    /// Whether a later attempt of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedsyncError::Database(_)
                | FeedsyncError::Io(_)
                | FeedsyncError::Fetch(_)
                | FeedsyncError::Malformed(_)
        )
    }
}

impl From<sqlx::Error> for FeedsyncError {
    fn from(e: sqlx::Error) -> Self {
        FeedsyncError::Database(e.to_string())
    }
}

/// Result type alias for feedsync operations.
pub type Result<T> = std::result::Result<T, FeedsyncError>;
