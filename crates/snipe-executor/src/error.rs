//! Error types for snipe-executor.
//!
//! Venue rejections and rate limits are `TradeOutcome` values, not
//! errors. This enum covers failures the engine cannot trade through.

use thiserror::Error;

/// Executor errors. All variants are fatal to the engine.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("journal write failed: {0}")]
    Journal(#[from] snipe_journal::JournalError),

    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

/// Result type alias for executor operations.
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;
