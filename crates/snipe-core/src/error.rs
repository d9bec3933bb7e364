//! Error types for snipe-core.
//!
//! Input errors are programmer bugs surfaced at construction time,
//! never runtime trade outcomes.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid token id: {0}")]
    InvalidTokenId(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
