//! Error types for snipe-capital.

use snipe_core::TokenId;
use thiserror::Error;

/// Capital subsystem errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapitalError {
    #[error("invalid capital configuration: {0}")]
    InvalidConfig(String),

    #[error("no allocation for market {0}")]
    NoAllocation(TokenId),

    #[error("bankroll update refused: {pending} reservation(s) pending")]
    ReservationsPending { pending: usize },

    #[error("recycler queue full (capacity {capacity})")]
    RecyclerFull { capacity: usize },
}

/// Result type alias for capital operations.
pub type CapitalResult<T> = std::result::Result<T, CapitalError>;
