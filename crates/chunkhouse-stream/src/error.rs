//! Error types for chunk stream operations.
//!
//! ## Error Handling Strategy
//!
//! - **Retriable errors**: `Unavailable`, `Io`
//! - **Permanent errors**: `InvalidRecord`, `Serialization`
//!
//! The coordinator retries retriable appends with backoff and reports everything
//! else as a transient failure for the invoker to redeliver.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream backend could not accept the append right now
    /// (throttled, restarting, network partition).
    #[error("Stream unavailable: {0}")]
    Unavailable(String),

    /// The record cannot be appended as given.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StreamError {
    /// Whether retrying the same append may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Unavailable(_) => true,
            StreamError::Io(_) => true,
            StreamError::InvalidRecord(_) => false,
            StreamError::Serialization(_) => false,
        }
    }
}
