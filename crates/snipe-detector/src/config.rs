//! Strategy configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use snipe_core::{Price, Side};

/// Expiration-sniping parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnipeConfig {
    /// Markets become eligible strictly inside this window before expiry.
    #[serde(default = "default_time_to_eligibility_sec")]
    pub time_to_eligibility_sec: i64,
    /// Asks at or above this price are never bought (strict bound).
    #[serde(default = "default_max_buy_price")]
    pub max_buy_price: Price,
    /// Minimum distance to unit parity: `1 - ask >= min_edge`.
    #[serde(default = "default_min_edge")]
    pub min_edge: Price,
    /// Outcome token the strategy buys. Parameterized so the predicate
    /// never hard-codes a side.
    #[serde(default = "default_side")]
    pub side: Side,
}

fn default_time_to_eligibility_sec() -> i64 {
    60
}

fn default_max_buy_price() -> Price {
    Price::new(Decimal::new(99, 2)) // 0.99
}

fn default_min_edge() -> Price {
    Price::new(Decimal::new(1, 2)) // 0.01
}

fn default_side() -> Side {
    Side::Yes
}

impl Default for SnipeConfig {
    fn default() -> Self {
        Self {
            time_to_eligibility_sec: default_time_to_eligibility_sec(),
            max_buy_price: default_max_buy_price(),
            min_edge: default_min_edge(),
            side: default_side(),
        }
    }
}

impl SnipeConfig {
    /// Validate parameter coherence.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_to_eligibility_sec <= 0 {
            return Err(format!(
                "time_to_eligibility_sec must be positive, got {}",
                self.time_to_eligibility_sec
            ));
        }
        if !self.max_buy_price.is_tradeable() {
            return Err(format!(
                "max_buy_price must lie in (0, 1), got {}",
                self.max_buy_price
            ));
        }
        if !self.min_edge.in_unit_range() {
            return Err(format!("min_edge must lie in [0, 1], got {}", self.min_edge));
        }
        Ok(())
    }
}
