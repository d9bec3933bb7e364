//! Centralized payout arithmetic.
//!
//! A binary market settles to exactly 0 or 1. Buying `size` USD at ask
//! `p` yields `size / p` shares; on a winning resolution each share pays
//! out 1, so the profit is `size / p * (1 - p)` less venue fees. The fee
//! model lives here and nowhere else.

use crate::decimal::{Price, Usd};
use rust_decimal::{Decimal, RoundingStrategy};

/// Payout model for a fill-or-kill buy of the near-certain outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutModel {
    /// Venue fee as a fraction of gross winnings. Zero on the flat model.
    fee_rate: Decimal,
}

impl PayoutModel {
    /// Fee-free simplified model.
    #[must_use]
    pub fn flat() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
        }
    }

    /// Model with a proportional fee on gross winnings.
    #[must_use]
    pub fn with_fee_rate(fee_rate: Decimal) -> Self {
        Self { fee_rate }
    }

    /// Realized profit when the bought outcome resolves to 1.
    ///
    /// `size / ask * (1 - ask) * (1 - fee)`, truncated to whole cents.
    /// Truncation (not rounding half-up) keeps the booked P&L conservative.
    #[must_use]
    pub fn win_pnl(&self, size: Usd, ask: Price) -> Usd {
        if ask.is_zero() {
            return Usd::ZERO;
        }
        let shares = size.inner() / ask.inner();
        let gross = shares * (Decimal::ONE - ask.inner());
        let net = gross * (Decimal::ONE - self.fee_rate);
        Usd::new(net.round_dp_with_strategy(2, RoundingStrategy::ToZero))
    }

    /// Realized loss when the bought outcome resolves to 0: the full stake.
    #[must_use]
    pub fn loss_pnl(&self, size: Usd) -> Usd {
        -size
    }
}

impl Default for PayoutModel {
    fn default() -> Self {
        Self::flat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn win_pnl_truncates_to_cents() {
        let model = PayoutModel::flat();
        // 10 / 0.97 * 0.03 = 0.30927... -> 0.30, not 0.31
        let pnl = model.win_pnl(Usd::new(dec!(10)), Price::new(dec!(0.97)));
        assert_eq!(pnl, Usd::new(dec!(0.30)));
    }

    #[test]
    fn win_pnl_with_fee() {
        let model = PayoutModel::with_fee_rate(dec!(0.10));
        // 100 / 0.5 * 0.5 = 100 gross, 90 net
        let pnl = model.win_pnl(Usd::new(dec!(100)), Price::new(dec!(0.5)));
        assert_eq!(pnl, Usd::new(dec!(90.00)));
    }

    #[test]
    fn loss_is_full_stake() {
        let model = PayoutModel::flat();
        assert_eq!(model.loss_pnl(Usd::new(dec!(10))), Usd::new(dec!(-10)));
    }

    #[test]
    fn zero_ask_yields_zero() {
        assert_eq!(
            PayoutModel::flat().win_pnl(Usd::new(dec!(10)), Price::ZERO),
            Usd::ZERO
        );
    }
}
