//! Combined pre-trade admission gate.
//!
//! Evaluation order: kill switches, then the market's circuit breaker,
//! then exposure limits. The first denial wins and is returned as a
//! structured reason. `post_execution_record` feeds outcomes back into
//! the breaker, the rolling ack-latency window, and the daily P&L.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use snipe_core::{Clock, ExposureView, GateReason, TokenId, Usd};

use crate::breaker::{BreakerConfig, BreakerRegistry, BreakerState};
use crate::exposure::ExposureConfig;
use crate::kill_switch::{KillSwitchConfig, KillSwitchPanel, KillSwitchStatus};

/// Number of ack-latency samples kept for the RpcLag p95.
const ACK_WINDOW: usize = 256;

/// Full risk gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskGateConfig {
    #[serde(default)]
    pub kill: KillSwitchConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub exposure: ExposureConfig,
}

/// Pre-trade admissibility decision point.
pub struct RiskGate {
    switches: KillSwitchPanel,
    breakers: BreakerRegistry,
    exposure: ExposureConfig,
    clock: Clock,
    outstanding: AtomicU32,
    ack_latencies: Mutex<VecDeque<f64>>,
}

impl RiskGate {
    #[must_use]
    pub fn new(config: RiskGateConfig, clock: Clock, day_open_bankroll: Usd) -> Self {
        Self {
            switches: KillSwitchPanel::new(config.kill, clock.clone(), day_open_bankroll),
            breakers: BreakerRegistry::new(config.breaker),
            exposure: config.exposure,
            clock,
            outstanding: AtomicU32::new(0),
            ack_latencies: Mutex::new(VecDeque::with_capacity(ACK_WINDOW)),
        }
    }

    /// Combined admission check. Denials are expected control flow.
    ///
    /// `feed_age_ms` is the age of the freshest watched tick; it drives
    /// the StaleFeed switch before the halt check so the decision sees
    /// current feed health.
    pub fn pre_execution_check(
        &self,
        token_id: &TokenId,
        amount: Usd,
        feed_age_ms: Option<i64>,
        view: &ExposureView,
    ) -> Result<(), GateReason> {
        if let Some(age) = feed_age_ms {
            self.switches.observe_feed_age(age);
        }
        self.switches
            .observe_outstanding(self.outstanding.load(Ordering::Acquire));

        if let Some(halt) = self.switches.halted() {
            debug!(token_id = %token_id, reason = %halt, "admission denied by kill switch");
            return Err(halt);
        }

        self.breakers.try_admit(token_id, self.clock.now_utc())?;
        self.exposure.can_allocate(view, amount)?;
        Ok(())
    }

    /// Feed an execution outcome back into breaker state, the rolling
    /// ack-latency window, and the daily P&L.
    pub fn post_execution_record(
        &self,
        token_id: &TokenId,
        success: bool,
        pnl: Usd,
        ack_latency_ms: Option<f64>,
    ) {
        let now = self.clock.now_utc();
        if success {
            self.breakers.record_success(token_id);
        } else {
            self.breakers.record_failure(token_id, "execution failed", now);
        }

        if !pnl.is_zero() {
            self.switches.record_pnl(pnl);
        }

        if let Some(latency) = ack_latency_ms {
            let p95 = {
                let mut window = self.ack_latencies.lock();
                if window.len() == ACK_WINDOW {
                    window.pop_front();
                }
                window.push_back(latency);
                rolling_p95(window.make_contiguous())
            };
            self.switches.observe_ack_p95(p95);
        }
    }

    /// Track in-flight order counts for the MaxOrders switch.
    pub fn order_opened(&self) {
        let count = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.switches.observe_outstanding(count);
    }

    pub fn order_closed(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "order_closed without matching order_opened");
        self.switches
            .observe_outstanding(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn outstanding_orders(&self) -> u32 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Direct feed-age observation for the background risk monitor.
    pub fn observe_feed_age(&self, max_age_ms: i64) {
        self.switches.observe_feed_age(max_age_ms);
    }

    /// Direct p95 ack-latency observation, for monitors that compute the
    /// percentile elsewhere (e.g. the metrics collector).
    pub fn observe_ack_p95(&self, p95_ms: f64) {
        self.switches.observe_ack_p95(p95_ms);
    }

    /// Daily reset hook; call with the current bankroll.
    pub fn roll_day_if_needed(&self, day_open_bankroll: Usd) {
        self.switches.roll_day_if_needed(day_open_bankroll);
    }

    /// Throttled re-logging of active halts.
    pub fn relog_active_halts(&self) {
        self.switches.relog_active();
    }

    pub fn engage_manual_halt(&self, reason: impl Into<String>) {
        self.switches.engage_manual(reason);
    }

    pub fn release_manual_halt(&self) {
        self.switches.release_manual();
    }

    #[must_use]
    pub fn halted(&self) -> Option<GateReason> {
        self.switches.halted()
    }

    #[must_use]
    pub fn breaker_state(&self, token_id: &TokenId) -> BreakerState {
        self.breakers.state(token_id, self.clock.now_utc())
    }

    #[must_use]
    pub fn status(&self) -> KillSwitchStatus {
        self.switches.status()
    }
}

/// p95 by linear interpolation over a copy of the window.
fn rolling_p95(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = 0.95 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use snipe_core::ManualClock;

    fn view_for(bankroll: rust_decimal::Decimal) -> ExposureView {
        ExposureView {
            bankroll: Usd::new(bankroll),
            total_allocated: Usd::ZERO,
            market_allocated: Usd::ZERO,
            available: Usd::new(bankroll),
        }
    }

    fn setup() -> (std::sync::Arc<ManualClock>, RiskGate) {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let (manual, clock) = ManualClock::shared(start);
        let gate = RiskGate::new(RiskGateConfig::default(), clock, Usd::new(dec!(1000)));
        (manual, gate)
    }

    #[test]
    fn admits_healthy_request() {
        let (_clock, gate) = setup();
        let tok = TokenId::from("tok");
        assert!(gate
            .pre_execution_check(&tok, Usd::new(dec!(10)), Some(100), &view_for(dec!(1000)))
            .is_ok());
    }

    #[test]
    fn stale_feed_denies_before_breaker_and_exposure() {
        let (_clock, gate) = setup();
        let tok = TokenId::from("tok");
        let denied = gate
            .pre_execution_check(&tok, Usd::new(dec!(10)), Some(900), &view_for(dec!(1000)))
            .unwrap_err();
        assert_eq!(denied, GateReason::StaleFeedHalt);
    }

    #[test]
    fn breaker_denial_after_failures() {
        let (_clock, gate) = setup();
        let tok = TokenId::from("tok");
        for _ in 0..3 {
            gate.post_execution_record(&tok, false, Usd::ZERO, None);
        }
        let denied = gate
            .pre_execution_check(&tok, Usd::new(dec!(10)), Some(100), &view_for(dec!(1000)))
            .unwrap_err();
        assert_eq!(denied, GateReason::BreakerOpen);
    }

    #[test]
    fn exposure_denial_is_last() {
        let (_clock, gate) = setup();
        let tok = TokenId::from("tok");
        // 5% of 100 = 5: requesting 10 breaks the per-market cap.
        let denied = gate
            .pre_execution_check(&tok, Usd::new(dec!(10)), Some(100), &view_for(dec!(100)))
            .unwrap_err();
        assert_eq!(denied, GateReason::ExposureCapMarket);
    }

    #[test]
    fn outstanding_orders_trip_max_orders() {
        let (clock, gate) = setup();
        let tok = TokenId::from("tok");
        for _ in 0..10 {
            gate.order_opened();
        }
        let denied = gate
            .pre_execution_check(&tok, Usd::new(dec!(1)), Some(100), &view_for(dec!(1000)))
            .unwrap_err();
        assert_eq!(denied, GateReason::MaxOrdersHalt);

        for _ in 0..10 {
            gate.order_closed();
        }
        clock.advance_ms(2500);
        assert!(gate
            .pre_execution_check(&tok, Usd::new(dec!(1)), Some(100), &view_for(dec!(1000)))
            .is_ok());
    }

    #[test]
    fn slow_acks_trip_rpc_lag() {
        let (_clock, gate) = setup();
        let tok = TokenId::from("tok");
        for _ in 0..20 {
            gate.post_execution_record(&tok, true, Usd::ZERO, Some(400.0));
        }
        let denied = gate
            .pre_execution_check(&tok, Usd::new(dec!(1)), Some(100), &view_for(dec!(1000)))
            .unwrap_err();
        assert_eq!(denied, GateReason::RpcLagHalt);
    }

    #[test]
    fn losses_feed_daily_loss_switch() {
        let (_clock, gate) = setup();
        let tok = TokenId::from("tok");
        gate.post_execution_record(&tok, true, Usd::new(dec!(-60)), Some(50.0));
        let denied = gate
            .pre_execution_check(&tok, Usd::new(dec!(1)), Some(100), &view_for(dec!(940)))
            .unwrap_err();
        assert_eq!(denied, GateReason::DailyLossHalt);
    }

    #[test]
    fn rolling_p95_interpolates() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        let p95 = rolling_p95(&samples);
        assert!((p95 - 95.05).abs() < 1e-9);
    }
}
