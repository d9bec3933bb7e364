//! Journal record types.
//!
//! One JSON object per line. Readers must tolerate unknown fields so
//! the format stays forward-compatible; serde ignores unknown fields by
//! default on deserialization.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use snipe_core::{Action, Price, Side, TokenId, TradeOutcome, Usd};

/// One execution attempt, filled or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Monotonic record id, assigned by the journal on append.
    #[serde(default)]
    pub id: u64,
    pub wall_time: DateTime<Utc>,
    pub correlation_id: String,
    pub token_id: TokenId,
    pub side: Side,
    pub action: Action,
    pub size: Usd,
    pub price: Price,
    pub outcome: TradeOutcome,
    pub tick_to_decision_ms: f64,
    pub decision_to_ack_ms: f64,
    pub expected_edge_cents: Decimal,
    /// Originally requested stake, when the allocator granted less.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_size: Option<Usd>,
    /// Populated on settlement; absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Usd>,
}

/// Capital release booked on settlement. Exactly one release entry
/// matches every filled trade once the market resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    #[serde(default)]
    pub id: u64,
    pub wall_time: DateTime<Utc>,
    pub token_id: TokenId,
    pub released: Usd,
    pub pnl: Usd,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Trade(TradeRecord),
    Release(ReleaseRecord),
}

impl JournalEntry {
    #[must_use]
    pub fn wall_time(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(r) => r.wall_time,
            Self::Release(r) => r.wall_time,
        }
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        match self {
            Self::Trade(r) => r.id = id,
            Self::Release(r) => r.id = id,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Trade(r) => r.id,
            Self::Release(r) => r.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn readers_tolerate_unknown_fields() {
        let json = r#"{
            "kind": "trade",
            "id": 7,
            "wall_time": "2025-06-01T12:00:00Z",
            "correlation_id": "snipe_1_abc",
            "token_id": "tok",
            "side": "yes",
            "action": "buy",
            "size": "10",
            "price": "0.97",
            "outcome": {"result": "filled", "price": "0.97", "size": "10"},
            "tick_to_decision_ms": 4.2,
            "decision_to_ack_ms": 80.0,
            "expected_edge_cents": "3.00",
            "some_future_field": {"nested": true}
        }"#;
        let entry: JournalEntry = serde_json::from_str(json).unwrap();
        match entry {
            JournalEntry::Trade(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.size, Usd::new(dec!(10)));
                assert!(r.outcome.is_filled());
                assert!(r.realized_pnl.is_none());
            }
            JournalEntry::Release(_) => panic!("expected trade entry"),
        }
    }

    #[test]
    fn roundtrip_release_entry() {
        let entry = JournalEntry::Release(ReleaseRecord {
            id: 3,
            wall_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 5).unwrap(),
            token_id: TokenId::from("tok"),
            released: Usd::new(dec!(10)),
            pnl: Usd::new(dec!(0.30)),
        });
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("\"kind\":\"release\""));
        let back: JournalEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }
}
