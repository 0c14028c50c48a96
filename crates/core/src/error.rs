//! Unified error types for revcache.
//!
//! Every failure the cache controller can surface maps to one variant here.
//! The display prefix is a stable code so logs and HTTP bodies stay greppable.

/// Unified error types for the reverse-fetching cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad URL or undecodable token.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Origin unreachable, timed out, or answered with a non-success status.
    #[error("FETCH_ERROR: {0}")]
    Fetch(String),

    /// Response body reached the configured maximum size.
    #[error("SIZE_EXCEEDED: body reached the {limit} byte limit")]
    SizeExceeded { limit: usize },

    /// Fewer bytes reached storage than were handed to the writer.
    #[error("INCOMPLETE_WRITE: {component} wrote {written} of {expected} bytes")]
    IncompleteWrite { component: &'static str, expected: usize, written: usize },

    /// Stored header component could not be decoded.
    #[error("CORRUPT_ENTRY: {0}")]
    CorruptEntry(String),

    /// Per-key lock could not be obtained.
    #[error("LOCK_ERROR: {0}")]
    LockAcquisition(String),

    /// `serve` was called for a key that was never successfully refreshed.
    #[error("NOT_CACHED: {0}")]
    NotCached(String),

    /// Background task panicked or was cancelled by the runtime.
    #[error("INTERNAL_ERROR: {0}")]
    Internal(String),

    /// Filesystem operation failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure was caused by the caller's input rather than the cache or origin.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("background task failed: {err}"))
    }
}
