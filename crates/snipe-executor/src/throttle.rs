//! Dispatch throttle: rate limit and dedupe share one critical section.
//!
//! The sliding-window order budget keeps a safety margin below the
//! venue's stated limit. Dedupe folds near-identical requests onto a
//! quantized size grid: one in-flight request per key, and recently
//! filled keys are suppressed for a configurable window. Child orders
//! of one split grant share a correlation id and count as one logical
//! attempt, so the fill suppression does not block their siblings.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use snipe_core::{Action, OrderRequest, Side, TokenId};

/// Throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Successful dispatches allowed per rolling 60s window.
    #[serde(default = "default_max_orders_per_minute")]
    pub max_orders_per_minute: u32,
    /// Size quantization grid for the dedupe key (dollars).
    #[serde(default = "default_dedupe_grid")]
    pub dedupe_grid: Decimal,
    /// Filled keys are suppressed for this long.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: i64,
}

fn default_max_orders_per_minute() -> u32 {
    50 // safety margin below the venue's stated 60
}

fn default_dedupe_grid() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_dedupe_window_secs() -> i64 {
    60
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_orders_per_minute: default_max_orders_per_minute(),
            dedupe_grid: default_dedupe_grid(),
            dedupe_window_secs: default_dedupe_window_secs(),
        }
    }
}

/// Hashable identity of a logically-identical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    token_id: TokenId,
    side: Side,
    action: Action,
    /// Size in grid steps, floored.
    size_steps: i64,
}

impl DedupeKey {
    #[must_use]
    pub fn for_request(request: &OrderRequest, grid: Decimal) -> Self {
        let steps = if grid.is_zero() {
            request.size.inner().to_i64().unwrap_or(0)
        } else {
            (request.size.inner() / grid).floor().to_i64().unwrap_or(0)
        };
        Self {
            token_id: request.token_id.clone(),
            side: request.side,
            action: request.action,
            size_steps: steps,
        }
    }
}

struct RecentFill {
    at: DateTime<Utc>,
    /// Correlation id of the attempt that filled; siblings of the same
    /// logical attempt are not duplicates of each other.
    correlation: String,
}

struct ThrottleState {
    sent: VecDeque<DateTime<Utc>>,
    in_flight: HashSet<DedupeKey>,
    recent_fills: HashMap<DedupeKey, RecentFill>,
}

/// Combined rate limiter and dedupe table.
pub struct Throttle {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

impl Throttle {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ThrottleState {
                sent: VecDeque::new(),
                in_flight: HashSet::new(),
                recent_fills: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn key_for(&self, request: &OrderRequest) -> DedupeKey {
        DedupeKey::for_request(request, self.config.dedupe_grid)
    }

    /// Claim the key for an attempt. Returns false when an identical
    /// request is in flight, or when a different logical attempt filled
    /// this key within the dedupe window.
    pub fn try_begin(&self, key: &DedupeKey, correlation: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let window = Duration::seconds(self.config.dedupe_window_secs);
        state.recent_fills.retain(|_, fill| now - fill.at < window);

        if state.in_flight.contains(key) {
            warn!(?key, "duplicate order suppressed (in flight)");
            return false;
        }
        if let Some(recent) = state.recent_fills.get(key) {
            if recent.correlation != correlation {
                warn!(?key, "duplicate order suppressed (recently filled)");
                return false;
            }
        }
        state.in_flight.insert(key.clone());
        true
    }

    /// Consume one slot of the rolling send budget, if available.
    pub fn try_consume_slot(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let cutoff = now - Duration::seconds(60);
        while state.sent.front().is_some_and(|&t| t <= cutoff) {
            state.sent.pop_front();
        }
        if state.sent.len() >= self.config.max_orders_per_minute as usize {
            debug!(
                in_window = state.sent.len(),
                max = self.config.max_orders_per_minute,
                "rate limit window full"
            );
            return false;
        }
        state.sent.push_back(now);
        true
    }

    /// Release the key. Filled keys stay suppressed for the dedupe
    /// window; failed ones may be retried immediately.
    pub fn finish(&self, key: &DedupeKey, correlation: &str, filled: bool, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.in_flight.remove(key);
        if filled {
            state.recent_fills.insert(
                key.clone(),
                RecentFill {
                    at: now,
                    correlation: correlation.to_string(),
                },
            );
        }
    }

    /// Dispatches currently inside the rolling window.
    #[must_use]
    pub fn in_window(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let cutoff = now - Duration::seconds(60);
        while state.sent.front().is_some_and(|&t| t <= cutoff) {
            state.sent.pop_front();
        }
        state.sent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use snipe_core::{CorrelationId, Price, Usd};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn request(token: &str, size: Decimal) -> OrderRequest {
        OrderRequest::new(
            TokenId::from(token),
            Side::Yes,
            Action::Buy,
            Usd::new(size),
            Price::new(dec!(0.97)),
            "expiry-snipe",
            Usd::new(dec!(100)),
            CorrelationId::new(0),
        )
        .unwrap()
    }

    fn throttle(max_per_minute: u32) -> Throttle {
        Throttle::new(ThrottleConfig {
            max_orders_per_minute: max_per_minute,
            ..ThrottleConfig::default()
        })
    }

    #[test]
    fn near_duplicates_fold_onto_grid() {
        let t = throttle(50);
        // 10.001 and 10.009 land on the same 1-cent step.
        let a = t.key_for(&request("tok", dec!(10.001)));
        let b = t.key_for(&request("tok", dec!(10.009)));
        assert_eq!(a, b);
        // 10.01 is the next step.
        let c = t.key_for(&request("tok", dec!(10.011)));
        assert_ne!(a, c);
    }

    #[test]
    fn second_in_flight_request_is_duplicate() {
        let t = throttle(50);
        let key = t.key_for(&request("tok", dec!(10)));
        assert!(t.try_begin(&key, "corr-a", t0()));
        // In-flight suppression holds regardless of correlation.
        assert!(!t.try_begin(&key, "corr-b", t0()));
        assert!(!t.try_begin(&key, "corr-a", t0()));

        // A failed finish frees the key for retry.
        t.finish(&key, "corr-a", false, t0());
        assert!(t.try_begin(&key, "corr-b", t0()));
    }

    #[test]
    fn filled_keys_stay_suppressed_for_window() {
        let t = throttle(50);
        let key = t.key_for(&request("tok", dec!(10)));
        assert!(t.try_begin(&key, "corr-a", t0()));
        t.finish(&key, "corr-a", true, t0());

        // Inside the window: other attempts are suppressed.
        assert!(!t.try_begin(&key, "corr-b", t0() + Duration::seconds(59)));
        // Past the window: free again.
        assert!(t.try_begin(&key, "corr-b", t0() + Duration::seconds(61)));
    }

    #[test]
    fn batch_siblings_share_one_claim() {
        let t = throttle(50);
        let key = t.key_for(&request("tok", dec!(10)));

        // First child of a split grant fills.
        assert!(t.try_begin(&key, "batch-1", t0()));
        t.finish(&key, "batch-1", true, t0());

        // Its sibling (same correlation) is not a duplicate.
        assert!(t.try_begin(&key, "batch-1", t0()));
        t.finish(&key, "batch-1", true, t0());

        // An unrelated attempt still is.
        assert!(!t.try_begin(&key, "batch-2", t0()));
    }

    #[test]
    fn rate_window_slides() {
        let t = throttle(2);
        assert!(t.try_consume_slot(t0()));
        assert!(t.try_consume_slot(t0() + Duration::milliseconds(200)));
        assert!(!t.try_consume_slot(t0() + Duration::milliseconds(400)));

        // The first slot rolls out of the window after 60s.
        assert!(t.try_consume_slot(t0() + Duration::seconds(61)));
        assert_eq!(t.in_window(t0() + Duration::seconds(61)), 2);
    }

    #[test]
    fn distinct_markets_never_collide() {
        let t = throttle(50);
        let a = t.key_for(&request("tok-a", dec!(10)));
        let b = t.key_for(&request("tok-b", dec!(10)));
        assert_ne!(a, b);
        assert!(t.try_begin(&a, "corr-a", t0()));
        assert!(t.try_begin(&b, "corr-b", t0()));
    }
}
