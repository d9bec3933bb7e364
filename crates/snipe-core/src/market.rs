//! Market identifiers and lifecycle snapshot types.
//!
//! The authoritative `Market` records live in the state machine crate;
//! everything outside it sees markets only through `MarketSnapshot`
//! value copies.

use crate::decimal::{Price, Usd};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome token identifier on the venue. Opaque, unique per market side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TokenId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Condition identifier grouping the outcome tokens of one market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(String);

impl ConditionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Market record as yielded by the upstream market source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Outcome token this engine trades.
    pub token_id: TokenId,
    /// Parent condition.
    pub condition_id: ConditionId,
    /// Human-readable question text.
    pub question: String,
    /// Resolution instant, UTC. Immutable after discovery.
    pub end_time: DateTime<Utc>,
    /// Whether the market uses the venue's negative-risk wrapper.
    #[serde(default)]
    pub negative_risk: bool,
}

/// Lifecycle phase of a tracked market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    /// Identified by the source, no tick seen yet.
    Discovered,
    /// Receiving ticks, not yet inside the strike window.
    Watching,
    /// Strategy predicate holds; queued for execution.
    Eligible,
    /// Capital reserved, orders live.
    Executing,
    /// Past resolution, awaiting settlement and capital release.
    Reconciling,
    /// Terminal.
    Done,
    /// Parked: stale feed or repeated failures.
    OnHold,
}

impl MarketPhase {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Phases in which the eligibility predicate may be evaluated.
    #[must_use]
    pub fn is_watchable(&self) -> bool {
        matches!(self, Self::Watching | Self::Eligible)
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Watching => "watching",
            Self::Eligible => "eligible",
            Self::Executing => "executing",
            Self::Reconciling => "reconciling",
            Self::Done => "done",
            Self::OnHold => "on_hold",
        };
        write!(f, "{s}")
    }
}

/// Value copy of a market's current state.
///
/// Snapshots are taken under the state machine's lock and handed out by
/// value; holders never observe later mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub token_id: TokenId,
    /// Discovery order, for stable expiry-tie scheduling.
    #[serde(default)]
    pub discovery_seq: u64,
    pub end_time: DateTime<Utc>,
    pub phase: MarketPhase,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    /// Wall time of the last accepted tick.
    pub last_tick_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub reserved_capital: Usd,
    pub realized_pnl: Usd,
    pub negative_risk: bool,
}

impl MarketSnapshot {
    /// Time remaining to resolution. Negative once expired.
    #[must_use]
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.end_time - now
    }

    /// Age of the last tick in milliseconds, if any tick was seen.
    #[must_use]
    pub fn tick_age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_tick_at.map(|t| (now - t).num_milliseconds())
    }
}

/// One top-of-book update from the venue's tick stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub token_id: TokenId,
    pub bid: Price,
    pub ask: Price,
    pub at: DateTime<Utc>,
}
