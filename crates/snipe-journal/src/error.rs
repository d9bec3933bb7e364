//! Error types for snipe-journal.
//!
//! A failed journal write is fatal to the engine: trading must not
//! continue without a durable record.

use thiserror::Error;

/// Journal errors.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for journal operations.
pub type JournalResult<T> = std::result::Result<T, JournalError>;
