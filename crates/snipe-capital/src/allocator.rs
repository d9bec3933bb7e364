//! Atomic capital reservation against market and portfolio caps.
//!
//! Grants may be smaller than requested: the granted amount is the
//! minimum of the request, the per-market effective cap, the remaining
//! total headroom, and available capital. Callers must use the returned
//! amount, never the requested one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use snipe_core::{Clock, ExposureView, TokenId, Usd};

use crate::error::{CapitalError, CapitalResult};

/// Capital allocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Per-market cap as a percent of bankroll.
    #[serde(default = "default_max_exposure_per_market_percent")]
    pub max_exposure_per_market_percent: Decimal,
    /// Per-market hard cap in dollars.
    #[serde(default = "default_max_exposure_per_market_absolute")]
    pub max_exposure_per_market_absolute: Usd,
    /// Portfolio cap as a percent of bankroll.
    #[serde(default = "default_max_total_exposure_percent")]
    pub max_total_exposure_percent: Decimal,
    /// Grants below this are refused as InsufficientCapital.
    #[serde(default = "default_min_order_size")]
    pub min_order_size: Usd,
    /// Grants above this are split into child orders.
    #[serde(default = "default_order_split_threshold")]
    pub order_split_threshold: Usd,
    /// Number of children a split produces.
    #[serde(default = "default_order_split_count")]
    pub order_split_count: u32,
    /// Settlement lag honored by the recycler before releasing capital.
    #[serde(default = "default_recycle_delay_secs")]
    pub recycle_delay_secs: i64,
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

fn default_min_order_size() -> Usd {
    Usd::new(Decimal::ONE)
}

fn default_order_split_threshold() -> Usd {
    Usd::new(Decimal::from(20))
}

fn default_order_split_count() -> u32 {
    3
}

fn default_recycle_delay_secs() -> i64 {
    5
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            max_exposure_per_market_percent: default_max_exposure_per_market_percent(),
            max_exposure_per_market_absolute: default_max_exposure_per_market_absolute(),
            max_total_exposure_percent: default_max_total_exposure_percent(),
            min_order_size: default_min_order_size(),
            order_split_threshold: default_order_split_threshold(),
            order_split_count: default_order_split_count(),
            recycle_delay_secs: default_recycle_delay_secs(),
        }
    }
}

/// Outcome of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOutcome {
    Granted,
    InsufficientCapital,
    MarketLimitExceeded,
    TotalLimitExceeded,
    AlreadyAllocated,
    InvalidAmount,
}

impl AllocationOutcome {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// A live reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub token_id: TokenId,
    pub amount: Usd,
    pub allocated_at: DateTime<Utc>,
    pub strategy: String,
    /// Child order sizes when the grant was split; a single entry equal
    /// to `amount` otherwise.
    pub child_orders: Vec<Usd>,
}

/// Utilization report for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationReport {
    pub bankroll: Usd,
    pub total_allocated: Usd,
    pub available: Usd,
    pub utilization_percent: Decimal,
    pub headroom: Usd,
    pub allocations: Vec<Allocation>,
}

struct Book {
    bankroll: Usd,
    allocations: HashMap<TokenId, Allocation>,
}

impl Book {
    fn total_allocated(&self) -> Usd {
        self.allocations
            .values()
            .fold(Usd::ZERO, |acc, a| acc + a.amount)
    }

    fn available(&self) -> Usd {
        (self.bankroll - self.total_allocated()).floor_zero()
    }
}

/// Single source of truth for bankroll and reservations.
pub struct CapitalAllocator {
    config: CapitalConfig,
    clock: Clock,
    book: Mutex<Book>,
}

impl CapitalAllocator {
    pub fn new(config: CapitalConfig, clock: Clock, initial_bankroll: Usd) -> CapitalResult<Self> {
        if !initial_bankroll.is_positive() {
            return Err(CapitalError::InvalidConfig(format!(
                "initial bankroll must be positive, got {initial_bankroll}"
            )));
        }
        info!(bankroll = %initial_bankroll, "capital allocator initialized");
        Ok(Self {
            config,
            clock,
            book: Mutex::new(Book {
                bankroll: initial_bankroll,
                allocations: HashMap::new(),
            }),
        })
    }

    /// Reserve capital for a market.
    ///
    /// The grant equals `min(requested, per-market effective cap, total
    /// headroom, available)` and may be below the request. Returns the
    /// outcome, the granted amount (zero on refusal), and the child
    /// order sizes to dispatch.
    pub fn request_allocation(
        &self,
        token_id: &TokenId,
        requested: Usd,
        strategy: &str,
    ) -> (AllocationOutcome, Usd, Vec<Usd>) {
        let mut book = self.book.lock();

        if !requested.is_positive() {
            warn!(token_id = %token_id, %requested, "invalid allocation request");
            return (AllocationOutcome::InvalidAmount, Usd::ZERO, Vec::new());
        }

        if book.allocations.contains_key(token_id) {
            warn!(token_id = %token_id, "allocation already live");
            return (AllocationOutcome::AlreadyAllocated, Usd::ZERO, Vec::new());
        }

        let market_cap = self.market_cap(book.bankroll);
        let total_cap = self.total_cap(book.bankroll);
        let total_allocated = book.total_allocated();
        let total_headroom = (total_cap - total_allocated).floor_zero();
        let available = book.available();

        let granted = requested
            .min(market_cap)
            .min(total_headroom)
            .min(available);

        if granted < self.config.min_order_size {
            let outcome = if total_headroom < self.config.min_order_size {
                AllocationOutcome::TotalLimitExceeded
            } else if market_cap < self.config.min_order_size {
                AllocationOutcome::MarketLimitExceeded
            } else {
                AllocationOutcome::InsufficientCapital
            };
            warn!(
                token_id = %token_id,
                %requested,
                %market_cap,
                %total_headroom,
                %available,
                outcome = ?outcome,
                "allocation refused"
            );
            return (outcome, Usd::ZERO, Vec::new());
        }

        let child_orders = self.split_orders(granted);
        let allocation = Allocation {
            token_id: token_id.clone(),
            amount: granted,
            allocated_at: self.clock.now_utc(),
            strategy: strategy.to_string(),
            child_orders: child_orders.clone(),
        };
        book.allocations.insert(token_id.clone(), allocation);

        info!(
            token_id = %token_id,
            %requested,
            %granted,
            children = child_orders.len(),
            "allocation granted"
        );
        (AllocationOutcome::Granted, granted, child_orders)
    }

    /// The amount `request_allocation` would grant right now, without
    /// reserving anything. Zero when the request would be refused.
    #[must_use]
    pub fn preview_grant(&self, token_id: &TokenId, requested: Usd) -> Usd {
        let book = self.book.lock();
        if !requested.is_positive() || book.allocations.contains_key(token_id) {
            return Usd::ZERO;
        }
        let total_headroom =
            (self.total_cap(book.bankroll) - book.total_allocated()).floor_zero();
        let granted = requested
            .min(self.market_cap(book.bankroll))
            .min(total_headroom)
            .min(book.available());
        if granted < self.config.min_order_size {
            Usd::ZERO
        } else {
            granted
        }
    }

    /// Release a reservation and apply realized P&L to the bankroll in
    /// the same critical section. Returns the previously reserved amount.
    pub fn release_allocation(&self, token_id: &TokenId, pnl: Usd) -> CapitalResult<Usd> {
        let mut book = self.book.lock();
        let allocation = book
            .allocations
            .remove(token_id)
            .ok_or_else(|| CapitalError::NoAllocation(token_id.clone()))?;

        let old_bankroll = book.bankroll;
        book.bankroll += pnl;
        info!(
            token_id = %token_id,
            released = %allocation.amount,
            %pnl,
            bankroll_before = %old_bankroll,
            bankroll_after = %book.bankroll,
            "allocation released"
        );
        Ok(allocation.amount)
    }

    /// Deposit or withdrawal outside trading P&L. Refused while any
    /// reservation is pending.
    pub fn update_bankroll(&self, delta: Usd) -> CapitalResult<Usd> {
        let mut book = self.book.lock();
        if !book.allocations.is_empty() {
            return Err(CapitalError::ReservationsPending {
                pending: book.allocations.len(),
            });
        }
        let updated = book.bankroll + delta;
        if !updated.is_positive() {
            return Err(CapitalError::InvalidConfig(format!(
                "bankroll update to {updated} refused"
            )));
        }
        info!(before = %book.bankroll, after = %updated, "bankroll updated");
        book.bankroll = updated;
        Ok(updated)
    }

    /// Reconcile bankroll against the on-chain wallet balance.
    pub fn sync_with_wallet(&self, wallet_balance: Usd) -> CapitalResult<Usd> {
        let current = self.bankroll();
        self.update_bankroll(wallet_balance - current)
    }

    #[must_use]
    pub fn bankroll(&self) -> Usd {
        self.book.lock().bankroll
    }

    #[must_use]
    pub fn total_allocated(&self) -> Usd {
        self.book.lock().total_allocated()
    }

    #[must_use]
    pub fn available(&self) -> Usd {
        self.book.lock().available()
    }

    #[must_use]
    pub fn allocation(&self, token_id: &TokenId) -> Option<Allocation> {
        self.book.lock().allocations.get(token_id).cloned()
    }

    /// Consistent snapshot for the risk gate's exposure checks.
    #[must_use]
    pub fn exposure_view(&self, token_id: &TokenId) -> ExposureView {
        let book = self.book.lock();
        ExposureView {
            bankroll: book.bankroll,
            total_allocated: book.total_allocated(),
            market_allocated: book
                .allocations
                .get(token_id)
                .map(|a| a.amount)
                .unwrap_or(Usd::ZERO),
            available: book.available(),
        }
    }

    /// Utilization report.
    #[must_use]
    pub fn allocation_report(&self) -> AllocationReport {
        let book = self.book.lock();
        let total_allocated = book.total_allocated();
        let utilization = if book.bankroll.is_positive() {
            total_allocated.inner() / book.bankroll.inner() * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        AllocationReport {
            bankroll: book.bankroll,
            total_allocated,
            available: book.available(),
            utilization_percent: utilization,
            headroom: (self.total_cap(book.bankroll) - total_allocated).floor_zero(),
            allocations: book.allocations.values().cloned().collect(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CapitalConfig {
        &self.config
    }

    fn market_cap(&self, bankroll: Usd) -> Usd {
        let by_percent = Usd::new(
            bankroll.inner() * self.config.max_exposure_per_market_percent / Decimal::from(100),
        );
        by_percent.min(self.config.max_exposure_per_market_absolute)
    }

    fn total_cap(&self, bankroll: Usd) -> Usd {
        Usd::new(bankroll.inner() * self.config.max_total_exposure_percent / Decimal::from(100))
    }

    /// Even split with the rounding remainder folded into the last child.
    fn split_orders(&self, amount: Usd) -> Vec<Usd> {
        if amount <= self.config.order_split_threshold || self.config.order_split_count <= 1 {
            return vec![amount];
        }
        let count = Decimal::from(self.config.order_split_count);
        let child = Usd::new((amount.inner() / count).round_dp(2));
        let mut children = vec![child; self.config.order_split_count as usize];
        let assigned = child * Decimal::from(self.config.order_split_count - 1);
        children[self.config.order_split_count as usize - 1] = amount - assigned;
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use snipe_core::ManualClock;

    fn allocator(bankroll: Decimal) -> CapitalAllocator {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let (_, clock) = ManualClock::shared(start);
        CapitalAllocator::new(CapitalConfig::default(), clock, Usd::new(bankroll)).unwrap()
    }

    #[test]
    fn grant_is_clamped_by_percent_cap() {
        // 5% of 100 = 5.00 is tighter than the 50.00 absolute cap.
        let a = allocator(dec!(100));
        let (outcome, granted, children) =
            a.request_allocation(&TokenId::from("p"), Usd::new(dec!(10)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::Granted);
        assert_eq!(granted, Usd::new(dec!(5)));
        assert_eq!(children, vec![Usd::new(dec!(5))]);
    }

    #[test]
    fn full_grant_when_inside_caps() {
        let a = allocator(dec!(1000));
        let (outcome, granted, _) =
            a.request_allocation(&TokenId::from("m"), Usd::new(dec!(10)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::Granted);
        assert_eq!(granted, Usd::new(dec!(10)));
        assert_eq!(a.total_allocated(), Usd::new(dec!(10)));
        assert_eq!(a.available(), Usd::new(dec!(990)));
    }

    #[test]
    fn double_allocation_refused() {
        let a = allocator(dec!(1000));
        let tok = TokenId::from("m");
        a.request_allocation(&tok, Usd::new(dec!(10)), "expiry-snipe");
        let (outcome, granted, _) = a.request_allocation(&tok, Usd::new(dec!(10)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::AlreadyAllocated);
        assert_eq!(granted, Usd::ZERO);
    }

    #[test]
    fn total_limit_refusal() {
        // Total cap: 30% of 1000 = 300. Per-market cap: 50 absolute.
        let a = allocator(dec!(1000));
        for i in 0..6 {
            let (outcome, granted, _) = a.request_allocation(
                &TokenId::from(format!("m{i}").as_str()),
                Usd::new(dec!(50)),
                "expiry-snipe",
            );
            assert_eq!(outcome, AllocationOutcome::Granted);
            assert_eq!(granted, Usd::new(dec!(50)));
        }
        let (outcome, granted, _) =
            a.request_allocation(&TokenId::from("m6"), Usd::new(dec!(50)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::TotalLimitExceeded);
        assert_eq!(granted, Usd::ZERO);
    }

    #[test]
    fn invalid_amount_refused() {
        let a = allocator(dec!(1000));
        let (outcome, _, _) =
            a.request_allocation(&TokenId::from("m"), Usd::new(dec!(0)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::InvalidAmount);
        let (outcome, _, _) =
            a.request_allocation(&TokenId::from("m"), Usd::new(dec!(-5)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::InvalidAmount);
    }

    #[test]
    fn preview_matches_actual_grant() {
        let a = allocator(dec!(100));
        let tok = TokenId::from("p");
        let preview = a.preview_grant(&tok, Usd::new(dec!(10)));
        let (outcome, granted, _) = a.request_allocation(&tok, Usd::new(dec!(10)), "expiry-snipe");
        assert_eq!(outcome, AllocationOutcome::Granted);
        assert_eq!(preview, granted);
        // A live reservation previews to zero.
        assert_eq!(a.preview_grant(&tok, Usd::new(dec!(10))), Usd::ZERO);
    }

    #[test]
    fn release_applies_pnl_atomically() {
        let a = allocator(dec!(1000));
        let tok = TokenId::from("m");
        a.request_allocation(&tok, Usd::new(dec!(10)), "expiry-snipe");

        let released = a.release_allocation(&tok, Usd::new(dec!(0.30))).unwrap();
        assert_eq!(released, Usd::new(dec!(10)));
        assert_eq!(a.bankroll(), Usd::new(dec!(1000.30)));
        assert_eq!(a.total_allocated(), Usd::ZERO);
    }

    #[test]
    fn release_roundtrip_restores_bankroll() {
        let a = allocator(dec!(1000));
        let tok = TokenId::from("m");
        a.request_allocation(&tok, Usd::new(dec!(25)), "expiry-snipe");
        a.release_allocation(&tok, Usd::ZERO).unwrap();
        assert_eq!(a.bankroll(), Usd::new(dec!(1000)));
        assert_eq!(a.available(), Usd::new(dec!(1000)));
    }

    #[test]
    fn release_without_allocation_is_typed() {
        let a = allocator(dec!(1000));
        assert!(matches!(
            a.release_allocation(&TokenId::from("ghost"), Usd::ZERO),
            Err(CapitalError::NoAllocation(_))
        ));
    }

    #[test]
    fn order_splitting_above_threshold() {
        // Threshold 20, split count 3.
        let a = allocator(dec!(10000));
        let (_, granted, children) =
            a.request_allocation(&TokenId::from("m"), Usd::new(dec!(50)), "expiry-snipe");
        assert_eq!(granted, Usd::new(dec!(50)));
        assert_eq!(
            children,
            vec![
                Usd::new(dec!(16.67)),
                Usd::new(dec!(16.67)),
                Usd::new(dec!(16.66)),
            ]
        );
        let sum = children.iter().fold(Usd::ZERO, |acc, c| acc + *c);
        assert_eq!(sum, granted);
    }

    #[test]
    fn no_split_at_threshold() {
        let a = allocator(dec!(10000));
        let (_, granted, children) =
            a.request_allocation(&TokenId::from("m"), Usd::new(dec!(20)), "expiry-snipe");
        assert_eq!(children, vec![granted]);
    }

    #[test]
    fn wallet_sync_rebases_bankroll_when_idle() {
        let a = allocator(dec!(1000));
        assert_eq!(
            a.sync_with_wallet(Usd::new(dec!(1100))).unwrap(),
            Usd::new(dec!(1100))
        );
        assert_eq!(a.bankroll(), Usd::new(dec!(1100)));

        // Refused while a reservation is live.
        a.request_allocation(&TokenId::from("m"), Usd::new(dec!(10)), "expiry-snipe");
        assert!(matches!(
            a.sync_with_wallet(Usd::new(dec!(1200))),
            Err(CapitalError::ReservationsPending { pending: 1 })
        ));
        assert_eq!(a.bankroll(), Usd::new(dec!(1100)));
    }

    #[test]
    fn bankroll_update_blocked_while_reserved() {
        let a = allocator(dec!(1000));
        let tok = TokenId::from("m");
        a.request_allocation(&tok, Usd::new(dec!(10)), "expiry-snipe");
        assert!(matches!(
            a.update_bankroll(Usd::new(dec!(100))),
            Err(CapitalError::ReservationsPending { pending: 1 })
        ));

        a.release_allocation(&tok, Usd::ZERO).unwrap();
        assert_eq!(
            a.update_bankroll(Usd::new(dec!(100))).unwrap(),
            Usd::new(dec!(1100))
        );
    }

    #[test]
    fn exposure_view_is_consistent() {
        let a = allocator(dec!(1000));
        let tok = TokenId::from("m");
        a.request_allocation(&tok, Usd::new(dec!(10)), "expiry-snipe");

        let view = a.exposure_view(&tok);
        assert_eq!(view.bankroll, Usd::new(dec!(1000)));
        assert_eq!(view.total_allocated, Usd::new(dec!(10)));
        assert_eq!(view.market_allocated, Usd::new(dec!(10)));
        assert_eq!(view.available, Usd::new(dec!(990)));

        let other = a.exposure_view(&TokenId::from("other"));
        assert_eq!(other.market_allocated, Usd::ZERO);
    }

    #[test]
    fn report_tracks_utilization() {
        let a = allocator(dec!(1000));
        a.request_allocation(&TokenId::from("m"), Usd::new(dec!(50)), "expiry-snipe");
        let report = a.allocation_report();
        assert_eq!(report.total_allocated, Usd::new(dec!(50)));
        assert_eq!(report.utilization_percent, dec!(5));
        assert_eq!(report.headroom, Usd::new(dec!(250)));
        assert_eq!(report.allocations.len(), 1);
    }
}
