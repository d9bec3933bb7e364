//! The eligibility predicate.
//!
//! `eligible(market, now)` holds when the market is watchable, strictly
//! inside the strike window, and the ask trades at a discount wide
//! enough to clear the minimum edge. Both the time window and the price
//! cap are strict bounds: a market exactly at either boundary is not
//! eligible.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::trace;

use snipe_core::{MarketSnapshot, Price, Side, TokenId};

use crate::config::SnipeConfig;

/// Why a snapshot failed the predicate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ineligible {
    #[error("phase not watchable")]
    PhaseNotWatchable,
    #[error("no quote yet")]
    QuoteMissing,
    #[error("market already expired")]
    Expired,
    #[error("expiry too far: {remaining_secs}s remaining")]
    ExpiryTooFar { remaining_secs: i64 },
    #[error("ask {ask} at or above cap")]
    AskAboveCap { ask: Price },
    #[error("edge {edge} below minimum")]
    EdgeTooThin { edge: Price },
}

/// Evaluated opportunity, carried to admission and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnipeSignal {
    pub token_id: TokenId,
    pub side: Side,
    pub ask: Price,
    /// Expected edge against unit parity, in cents.
    pub edge_cents: Decimal,
    /// Time remaining to resolution when evaluated.
    pub expires_in_ms: i64,
}

/// Pure, deterministic evaluator over market snapshots.
///
/// Takes a snapshot by reference but reads only its values; it holds no
/// state of its own beyond configuration.
#[derive(Debug, Clone)]
pub struct EligibilityEvaluator {
    config: SnipeConfig,
}

impl EligibilityEvaluator {
    #[must_use]
    pub fn new(config: SnipeConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SnipeConfig {
        &self.config
    }

    /// Full evaluation with a typed reason on failure.
    pub fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<SnipeSignal, Ineligible> {
        if !snapshot.phase.is_watchable() {
            return Err(Ineligible::PhaseNotWatchable);
        }

        let ask = snapshot.best_ask.ok_or(Ineligible::QuoteMissing)?;
        if snapshot.best_bid.is_none() {
            return Err(Ineligible::QuoteMissing);
        }

        let remaining = snapshot.time_to_expiry(now);
        if remaining <= Duration::zero() {
            return Err(Ineligible::Expired);
        }
        // Strict window: exactly time_to_eligibility_sec out is not eligible.
        if remaining >= Duration::seconds(self.config.time_to_eligibility_sec) {
            return Err(Ineligible::ExpiryTooFar {
                remaining_secs: remaining.num_seconds(),
            });
        }

        // Strict price cap: an ask exactly at max_buy_price is refused.
        if ask >= self.config.max_buy_price {
            return Err(Ineligible::AskAboveCap { ask });
        }

        let edge = ask.complement();
        if edge < self.config.min_edge {
            return Err(Ineligible::EdgeTooThin { edge });
        }

        trace!(
            token_id = %snapshot.token_id,
            %ask,
            edge_cents = %ask.edge_cents(),
            remaining_ms = remaining.num_milliseconds(),
            "snipe opportunity"
        );

        Ok(SnipeSignal {
            token_id: snapshot.token_id.clone(),
            side: self.config.side,
            ask,
            edge_cents: ask.edge_cents(),
            expires_in_ms: remaining.num_milliseconds(),
        })
    }

    /// Boolean form used by the state machine's transition sweep.
    #[must_use]
    pub fn holds(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> bool {
        self.evaluate(snapshot, now).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use snipe_core::{MarketPhase, Usd};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn snapshot(secs_to_expiry: i64, ask: Decimal, phase: MarketPhase) -> MarketSnapshot {
        MarketSnapshot {
            token_id: TokenId::from("tok"),
            discovery_seq: 0,
            end_time: t0() + Duration::seconds(secs_to_expiry),
            phase,
            best_bid: Some(Price::new(ask - dec!(0.01))),
            best_ask: Some(Price::new(ask)),
            last_tick_at: Some(t0()),
            failure_count: 0,
            reserved_capital: Usd::ZERO,
            realized_pnl: Usd::ZERO,
            negative_risk: false,
        }
    }

    fn evaluator() -> EligibilityEvaluator {
        EligibilityEvaluator::new(SnipeConfig {
            time_to_eligibility_sec: 60,
            max_buy_price: Price::new(dec!(0.99)),
            min_edge: Price::new(dec!(0.01)),
            side: Side::Yes,
        })
    }

    #[test]
    fn happy_path_signal() {
        let signal = evaluator()
            .evaluate(&snapshot(45, dec!(0.97), MarketPhase::Watching), t0())
            .unwrap();
        assert_eq!(signal.ask, Price::new(dec!(0.97)));
        assert_eq!(signal.edge_cents, dec!(3.00));
        assert_eq!(signal.side, Side::Yes);
        assert_eq!(signal.expires_in_ms, 45_000);
    }

    #[test]
    fn window_boundary_is_strict() {
        let e = evaluator();
        // Exactly 60s out: not eligible.
        assert_eq!(
            e.evaluate(&snapshot(60, dec!(0.97), MarketPhase::Watching), t0()),
            Err(Ineligible::ExpiryTooFar { remaining_secs: 60 })
        );
        // One millisecond inside the window: eligible.
        let snap = snapshot(60, dec!(0.97), MarketPhase::Watching);
        assert!(e.holds(&snap, t0() + Duration::milliseconds(1)));
    }

    #[test]
    fn price_boundary_is_strict() {
        let e = evaluator();
        assert_eq!(
            e.evaluate(&snapshot(45, dec!(0.99), MarketPhase::Watching), t0()),
            Err(Ineligible::AskAboveCap {
                ask: Price::new(dec!(0.99))
            })
        );
        assert!(e.holds(&snapshot(45, dec!(0.9899), MarketPhase::Watching), t0()));
    }

    #[test]
    fn min_edge_is_inclusive() {
        let e = EligibilityEvaluator::new(SnipeConfig {
            min_edge: Price::new(dec!(0.03)),
            ..SnipeConfig::default()
        });
        // Edge exactly at the minimum passes.
        assert!(e.holds(&snapshot(45, dec!(0.97), MarketPhase::Watching), t0()));
        // A hair under fails.
        assert_eq!(
            e.evaluate(&snapshot(45, dec!(0.971), MarketPhase::Watching), t0()),
            Err(Ineligible::EdgeTooThin {
                edge: Price::new(dec!(0.029))
            })
        );
    }

    #[test]
    fn expired_and_unwatchable_refused() {
        let e = evaluator();
        assert_eq!(
            e.evaluate(&snapshot(-1, dec!(0.97), MarketPhase::Watching), t0()),
            Err(Ineligible::Expired)
        );
        assert_eq!(
            e.evaluate(&snapshot(45, dec!(0.97), MarketPhase::Executing), t0()),
            Err(Ineligible::PhaseNotWatchable)
        );
        assert!(e.holds(&snapshot(45, dec!(0.97), MarketPhase::Eligible), t0()));
    }

    #[test]
    fn missing_quote_refused() {
        let e = evaluator();
        let mut snap = snapshot(45, dec!(0.97), MarketPhase::Watching);
        snap.best_ask = None;
        assert_eq!(e.evaluate(&snap, t0()), Err(Ineligible::QuoteMissing));
    }

    #[test]
    fn determinism_over_identical_inputs() {
        let e = evaluator();
        let snap = snapshot(45, dec!(0.97), MarketPhase::Watching);
        assert_eq!(e.evaluate(&snap, t0()), e.evaluate(&snap, t0()));
    }
}
