//! Exposure limit checks.
//!
//! Pure functions over an `ExposureView` snapshot; the gate never reads
//! the allocator's internal book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use snipe_core::{ExposureView, GateReason, Usd};

/// Exposure cap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Per-market cap as a percent of bankroll.
    #[serde(default = "default_max_exposure_per_market_percent")]
    pub max_exposure_per_market_percent: Decimal,
    /// Per-market hard cap in dollars.
    #[serde(default = "default_max_exposure_per_market_absolute")]
    pub max_exposure_per_market_absolute: Usd,
    /// Portfolio cap as a percent of bankroll.
    #[serde(default = "default_max_total_exposure_percent")]
    pub max_total_exposure_percent: Decimal,
}

fn default_max_exposure_per_market_percent() -> Decimal {
    Decimal::from(5)
}

fn default_max_exposure_per_market_absolute() -> Usd {
    Usd::new(Decimal::from(50))
}

fn default_max_total_exposure_percent() -> Decimal {
    Decimal::from(30)
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            max_exposure_per_market_percent: default_max_exposure_per_market_percent(),
            max_exposure_per_market_absolute: default_max_exposure_per_market_absolute(),
            max_total_exposure_percent: default_max_total_exposure_percent(),
        }
    }
}

impl ExposureConfig {
    /// Effective per-market cap: the tighter of percent and absolute.
    #[must_use]
    pub fn market_cap(&self, bankroll: Usd) -> Usd {
        let by_percent = Usd::new(
            bankroll.inner() * self.max_exposure_per_market_percent / Decimal::from(100),
        );
        by_percent.min(self.max_exposure_per_market_absolute)
    }

    /// Portfolio cap in dollars.
    #[must_use]
    pub fn total_cap(&self, bankroll: Usd) -> Usd {
        Usd::new(bankroll.inner() * self.max_total_exposure_percent / Decimal::from(100))
    }

    /// Would `amount` more exposure on this market stay inside all caps?
    pub fn can_allocate(&self, view: &ExposureView, amount: Usd) -> Result<(), GateReason> {
        let market_cap = self.market_cap(view.bankroll);
        if view.market_allocated + amount > market_cap {
            trace!(
                market_allocated = %view.market_allocated,
                %amount,
                cap = %market_cap,
                "per-market exposure cap"
            );
            return Err(GateReason::ExposureCapMarket);
        }

        let total_cap = self.total_cap(view.bankroll);
        if view.total_allocated + amount > total_cap {
            trace!(
                total_allocated = %view.total_allocated,
                %amount,
                cap = %total_cap,
                "total exposure cap"
            );
            return Err(GateReason::ExposureCapTotal);
        }

        if amount > view.available {
            return Err(GateReason::InsufficientCapital);
        }

        Ok(())
    }
}
