//! Cross-component value snapshots.

use crate::decimal::Usd;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the allocator's book, produced by the capital
/// allocator and consumed by the risk gate's exposure checks.
///
/// Passing this by value keeps the gate from reaching into the
/// allocator's locked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureView {
    /// Total capital under management.
    pub bankroll: Usd,
    /// Sum of all live reservations.
    pub total_allocated: Usd,
    /// Live reservation against the market under consideration.
    pub market_allocated: Usd,
    /// Bankroll minus all reservations, floored at zero.
    pub available: Usd,
}
