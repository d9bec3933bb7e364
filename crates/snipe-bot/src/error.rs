//! Application errors and exit codes.

use thiserror::Error;

/// Top-level application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Journal(#[from] snipe_journal::JournalError),

    #[error(transparent)]
    Market(#[from] snipe_market::MarketError),

    #[error(transparent)]
    Capital(#[from] snipe_capital::CapitalError),

    #[error(transparent)]
    Executor(#[from] snipe_executor::ExecutorError),

    #[error(transparent)]
    Core(#[from] snipe_core::CoreError),

    #[error("fatal runtime error: {0}")]
    Fatal(String),
}

impl AppError {
    /// Process exit code: 1 for configuration errors, 2 for fatal
    /// runtime errors.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            _ => 2,
        }
    }
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
