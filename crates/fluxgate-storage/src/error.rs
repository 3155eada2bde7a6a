//! Storage error types.

use thiserror::Error;

/// Substrings (matched lowercase) that mark a backend error as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    "connection",
    "timeout",
    "network",
    "unavailable",
    "temporary",
    "502",
    "503",
    "504",
];

/// Returns `true` if a backend error message describes a transient failure.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Errors raised by a single backend client call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Error reported by the backend, or while talking to it.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Local failure unrelated to the backend (decoding, closed client, ...).
    #[error("unexpected client error: {message}")]
    Unexpected { message: String },
}

impl ClientError {
    /// Shorthand for a [`ClientError::Backend`].
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ClientError::Unexpected`].
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Only backend errors with a transient marker are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { message } => is_retryable_message(message),
            Self::Unexpected { .. } => false,
        }
    }
}

/// Result type for backend client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No usable connection could be opened.
    #[error("connection error: {message}")]
    ConnectionError { message: String },

    /// The query failed on the backend, possibly after retries.
    #[error("query failed after {attempts} attempt(s): {message}")]
    QueryFailed { attempts: u32, message: String },

    /// A local failure while executing the query; never retried.
    #[error("unexpected storage error: {message}")]
    Unexpected { message: String },
}

/// Result type for pool operations.
pub type StorageResult<T> = Result<T, StorageError>;
