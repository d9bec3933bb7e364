//! Error types for snipe-market.

use snipe_core::{MarketPhase, TokenId};
use thiserror::Error;

/// State machine errors. Unknown tokens and illegal transitions are
/// typed results, never panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("market not found: {0}")]
    NotFound(TokenId),

    #[error("market already tracked: {0}")]
    AlreadyTracked(TokenId),

    #[error("illegal transition for {token_id}: {from} -> {to} ({detail})")]
    IllegalTransition {
        token_id: TokenId,
        from: MarketPhase,
        to: MarketPhase,
        detail: String,
    },

    #[error("invalid quote for {token_id}: {detail}")]
    InvalidQuote { token_id: TokenId, detail: String },
}

/// Result type alias for state machine operations.
pub type MarketResult<T> = std::result::Result<T, MarketError>;
