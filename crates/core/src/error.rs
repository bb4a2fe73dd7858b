//! Unified error types for footprints.
//!
//! Every error is returned to the immediate caller; nothing in the core retries
//! or treats an error as fatal.

use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio_rusqlite::rusqlite;

/// Boxed error returned by caller-supplied collaborators (fetchers, aggregators).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared failure cause.
///
/// A single failed computation is handed to every caller that was waiting on
/// it, so the cause is reference counted rather than owned.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Unified error type for footprints.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed bounding box, non-positive limit or page size.
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),

    /// The fetcher collaborator failed. Never cached.
    #[error("FETCH_ERROR: {0}")]
    Fetch(Cause),

    /// An aggregator or compute function failed. Never cached.
    #[error("COMPUTE_ERROR: {0}")]
    Compute(Cause),

    /// Requested page index is outside the valid range.
    #[error(
        "RANGE_ERROR: page {requested} is outside the valid range [{}, {}]",
        valid_range.start(),
        valid_range.end()
    )]
    Range { requested: usize, valid_range: RangeInclusive<usize> },

    /// Persisted store operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Persisted store failure with no more specific variant.
    #[error("CACHE_ERROR: {0}")]
    Store(String),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A persisted value could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Fetch(_) => "FETCH_ERROR",
            Error::Compute(_) => "COMPUTE_ERROR",
            Error::Range { .. } => "RANGE_ERROR",
            Error::Database(_) | Error::Store(_) | Error::MigrationFailed(_) | Error::Serialization(_) => {
                "CACHE_ERROR"
            }
        }
    }

    /// Whether re-issuing the same call may succeed.
    ///
    /// Informational only: retry policy belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Compute(_))
    }

    /// The underlying collaborator failure, if any.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Error::Fetch(cause) | Error::Compute(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            other => Error::Store(other.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
