//! Typed execution outcomes.
//!
//! Gate denials and venue rejections are expected control flow and travel
//! as values; they are never raised as errors.

use crate::decimal::{Price, Usd};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason the risk gate refused an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    StaleFeedHalt,
    RpcLagHalt,
    MaxOrdersHalt,
    DailyLossHalt,
    ManualHalt,
    /// Per-market circuit breaker is open (or half-open and saturated).
    BreakerOpen,
    ExposureCapMarket,
    ExposureCapTotal,
    InsufficientCapital,
    AlreadyAllocated,
}

impl GateReason {
    /// Whether the denial comes from a global kill switch.
    #[must_use]
    pub fn is_halt(&self) -> bool {
        matches!(
            self,
            Self::StaleFeedHalt
                | Self::RpcLagHalt
                | Self::MaxOrdersHalt
                | Self::DailyLossHalt
                | Self::ManualHalt
        )
    }
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StaleFeedHalt => "stale_feed_halt",
            Self::RpcLagHalt => "rpc_lag_halt",
            Self::MaxOrdersHalt => "max_orders_halt",
            Self::DailyLossHalt => "daily_loss_halt",
            Self::ManualHalt => "manual_halt",
            Self::BreakerOpen => "breaker_open",
            Self::ExposureCapMarket => "exposure_cap_market",
            Self::ExposureCapTotal => "exposure_cap_total",
            Self::InsufficientCapital => "insufficient_capital",
            Self::AlreadyAllocated => "already_allocated",
        };
        write!(f, "{s}")
    }
}

/// Rejection reported by (or on behalf of) the venue.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum VenueError {
    #[error("no liquidity at requested price")]
    NoLiquidity,
    #[error("order signature rejected")]
    InvalidSignature,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("venue rate limit")]
    RateLimited,
    #[error("venue call timed out")]
    Timeout,
    #[error("venue error: {0}")]
    Unknown(String),
}

impl VenueError {
    /// Transient failures worth a backoff retry; everything else fails fast.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoLiquidity | Self::RateLimited)
    }
}

/// Terminal result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum TradeOutcome {
    /// Fill-or-kill order filled in full.
    Filled { price: Price, size: Usd },
    /// Refused before dispatch by the risk gate.
    RejectedByGate { reason: GateReason },
    /// Refused by the venue.
    RejectedByVenue { reason: VenueError },
    /// Dispatch exceeded the order timeout.
    Timeout,
    /// An identical request is already in flight; no side effects occurred.
    Duplicate,
    /// Local rate limit still exhausted after all retries.
    RateLimited,
}

impl TradeOutcome {
    #[must_use]
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled { .. })
    }

    /// Whether the attempt should feed the market's failure counter.
    #[must_use]
    pub fn is_venue_failure(&self) -> bool {
        matches!(self, Self::RejectedByVenue { .. } | Self::Timeout)
    }

    /// Short tag for logs and metrics labels.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Filled { .. } => "filled",
            Self::RejectedByGate { .. } => "rejected_by_gate",
            Self::RejectedByVenue { .. } => "rejected_by_venue",
            Self::Timeout => "timeout",
            Self::Duplicate => "duplicate",
            Self::RateLimited => "rate_limited",
        }
    }
}
