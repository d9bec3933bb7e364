//! Per-market lifecycle state machine.
//!
//! Owns every tracked `Market` record behind one short-lived mutex.
//! All state mutations are total functions of (current state, event):
//! unknown tokens return typed not-found results and illegal transitions
//! fail hard. The periodic sweep emits transitions as values; it never
//! calls into other components while holding the lock.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snipe_core::{MarketInfo, MarketPhase, MarketSnapshot, Price, TokenId, Usd};

use crate::error::{MarketError, MarketResult};

/// Configuration for lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Feed considered stale after this many milliseconds without a tick.
    #[serde(default = "default_stale_feed_threshold_ms")]
    pub stale_feed_threshold_ms: i64,
    /// Park the market once the failure counter exceeds this.
    #[serde(default = "default_max_failures_before_hold")]
    pub max_failures_before_hold: u32,
    /// OnHold markets may rejoin after this cooldown even if the failure
    /// counter has not decayed.
    #[serde(default = "default_hold_cooldown_secs")]
    pub hold_cooldown_secs: i64,
    /// Consecutive clean ticks after which the failure counter resets.
    #[serde(default = "default_failure_decay_clean_ticks")]
    pub failure_decay_clean_ticks: u32,
}

fn default_stale_feed_threshold_ms() -> i64 {
    500
}

fn default_max_failures_before_hold() -> u32 {
    3
}

fn default_hold_cooldown_secs() -> i64 {
    60
}

fn default_failure_decay_clean_ticks() -> u32 {
    10
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            stale_feed_threshold_ms: default_stale_feed_threshold_ms(),
            max_failures_before_hold: default_max_failures_before_hold(),
            hold_cooldown_secs: default_hold_cooldown_secs(),
            failure_decay_clean_ticks: default_failure_decay_clean_ticks(),
        }
    }
}

/// One observed transition, returned to the sweep caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub token_id: TokenId,
    pub from: MarketPhase,
    pub to: MarketPhase,
}

/// History entry kept per market for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub at: DateTime<Utc>,
    pub from: MarketPhase,
    pub to: MarketPhase,
    pub reason: String,
}

/// Counts of markets per phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseStats {
    pub discovered: usize,
    pub watching: usize,
    pub eligible: usize,
    pub executing: usize,
    pub reconciling: usize,
    pub done: usize,
    pub on_hold: usize,
    pub total: usize,
}

struct MarketRecord {
    info: MarketInfo,
    discovery_seq: u64,
    phase: MarketPhase,
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    last_tick_at: Option<DateTime<Utc>>,
    failure_count: u32,
    clean_ticks: u32,
    hold_since: Option<DateTime<Utc>>,
    done_at: Option<DateTime<Utc>>,
    reserved: Usd,
    realized_pnl: Usd,
    history: Vec<TransitionEvent>,
}

impl MarketRecord {
    fn new(info: MarketInfo, discovery_seq: u64) -> Self {
        Self {
            info,
            discovery_seq,
            phase: MarketPhase::Discovered,
            best_bid: None,
            best_ask: None,
            last_tick_at: None,
            failure_count: 0,
            clean_ticks: 0,
            hold_since: None,
            done_at: None,
            reserved: Usd::ZERO,
            realized_pnl: Usd::ZERO,
            history: Vec::new(),
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, threshold_ms: i64) -> bool {
        match self.last_tick_at {
            Some(t) => (now - t).num_milliseconds() > threshold_ms,
            None => true,
        }
    }

    fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            token_id: self.info.token_id.clone(),
            discovery_seq: self.discovery_seq,
            end_time: self.info.end_time,
            phase: self.phase,
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            last_tick_at: self.last_tick_at,
            failure_count: self.failure_count,
            reserved_capital: self.reserved,
            realized_pnl: self.realized_pnl,
            negative_risk: self.info.negative_risk,
        }
    }

    fn transition(&mut self, to: MarketPhase, now: DateTime<Utc>, reason: &str) -> Transition {
        let from = self.phase;
        self.phase = to;
        match to {
            MarketPhase::OnHold => self.hold_since = Some(now),
            MarketPhase::Done => self.done_at = Some(now),
            _ => {}
        }
        self.history.push(TransitionEvent {
            at: now,
            from,
            to,
            reason: reason.to_string(),
        });
        info!(
            token_id = %self.info.token_id,
            %from,
            %to,
            reason,
            "market transitioned"
        );
        Transition {
            token_id: self.info.token_id.clone(),
            from,
            to,
        }
    }
}

/// Thread-safe lifecycle manager for all tracked markets.
pub struct MarketStateMachine {
    config: MachineConfig,
    markets: Mutex<HashMap<TokenId, MarketRecord>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl MarketStateMachine {
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            markets: Mutex::new(HashMap::new()),
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Track a newly discovered market.
    pub fn add_market(&self, info: MarketInfo) -> MarketResult<()> {
        let mut markets = self.markets.lock();
        if markets.contains_key(&info.token_id) {
            return Err(MarketError::AlreadyTracked(info.token_id));
        }
        info!(
            token_id = %info.token_id,
            end_time = %info.end_time,
            question = %info.question.chars().take(60).collect::<String>(),
            "market added"
        );
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        markets.insert(info.token_id.clone(), MarketRecord::new(info, seq));
        Ok(())
    }

    /// Apply a top-of-book update.
    ///
    /// Rejects out-of-range or crossed quotes with a typed error; a
    /// rejected tick does not advance `last_tick_at`. Clean ticks decay
    /// the failure counter after the configured streak.
    pub fn update_price(
        &self,
        token_id: &TokenId,
        bid: Price,
        ask: Price,
        now: DateTime<Utc>,
    ) -> MarketResult<()> {
        let mut markets = self.markets.lock();
        let record = markets
            .get_mut(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))?;

        if !bid.in_unit_range() || !ask.in_unit_range() {
            return Err(MarketError::InvalidQuote {
                token_id: token_id.clone(),
                detail: format!("quote outside [0,1]: bid={bid} ask={ask}"),
            });
        }
        if bid > ask {
            return Err(MarketError::InvalidQuote {
                token_id: token_id.clone(),
                detail: format!("crossed book: bid={bid} > ask={ask}"),
            });
        }

        record.best_bid = Some(bid);
        record.best_ask = Some(ask);
        record.last_tick_at = Some(now);

        if record.failure_count > 0 {
            record.clean_ticks += 1;
            if record.clean_ticks >= self.config.failure_decay_clean_ticks {
                debug!(
                    token_id = %token_id,
                    previous = record.failure_count,
                    "failure counter decayed after clean tick streak"
                );
                record.failure_count = 0;
                record.clean_ticks = 0;
            }
        }

        Ok(())
    }

    /// Run one transition sweep.
    ///
    /// `eligible` is the strategy predicate, evaluated over a snapshot.
    /// Multi-step moves (e.g. Discovered -> Watching -> Eligible)
    /// cascade inside one sweep, so the sweep is idempotent for a fixed
    /// `now`: a second call with unchanged inputs yields no transitions.
    pub fn check_transitions(
        &self,
        now: DateTime<Utc>,
        eligible: &dyn Fn(&MarketSnapshot, DateTime<Utc>) -> bool,
    ) -> Vec<Transition> {
        let mut markets = self.markets.lock();
        let mut transitions = Vec::new();

        for record in markets.values_mut() {
            // The chain length is bounded by the phase count; the cap
            // guards against a pathological predicate.
            for _ in 0..4 {
                match Self::next_step(&self.config, record, now, eligible) {
                    Some((to, reason)) => {
                        transitions.push(record.transition(to, now, reason));
                    }
                    None => break,
                }
            }
        }

        transitions
    }

    /// One lifecycle step for a market, or `None` when it is settled
    /// for this `now`.
    fn next_step(
        config: &MachineConfig,
        record: &mut MarketRecord,
        now: DateTime<Utc>,
        eligible: &dyn Fn(&MarketSnapshot, DateTime<Utc>) -> bool,
    ) -> Option<(MarketPhase, &'static str)> {
        let stale = record.is_stale(now, config.stale_feed_threshold_ms);
        let failures_over = record.failure_count > config.max_failures_before_hold;
        let expired = now >= record.info.end_time;

        match record.phase {
            MarketPhase::Discovered => {
                if record.last_tick_at.is_some() {
                    Some((MarketPhase::Watching, "first tick received"))
                } else if expired {
                    Some((MarketPhase::Done, "expired before first tick"))
                } else {
                    None
                }
            }
            MarketPhase::Watching | MarketPhase::Eligible => {
                if expired && record.reserved.is_zero() {
                    Some((MarketPhase::Done, "expired without execution"))
                } else if stale {
                    Some((MarketPhase::OnHold, "feed stale"))
                } else if failures_over {
                    Some((MarketPhase::OnHold, "failure threshold crossed"))
                } else {
                    let is_eligible = eligible(&record.snapshot(), now);
                    match (record.phase, is_eligible) {
                        (MarketPhase::Watching, true) => {
                            Some((MarketPhase::Eligible, "eligibility predicate holds"))
                        }
                        (MarketPhase::Eligible, false) => {
                            Some((MarketPhase::Watching, "eligibility predicate lapsed"))
                        }
                        _ => None,
                    }
                }
            }
            MarketPhase::OnHold => {
                if expired && record.reserved.is_zero() {
                    Some((MarketPhase::Done, "expired while on hold"))
                } else if !stale {
                    let cooldown_over = record
                        .hold_since
                        .map(|t| (now - t).num_seconds() >= config.hold_cooldown_secs)
                        .unwrap_or(true);
                    if !failures_over {
                        Some((MarketPhase::Watching, "feed recovered"))
                    } else if cooldown_over {
                        record.failure_count = 0;
                        record.clean_ticks = 0;
                        Some((MarketPhase::Watching, "hold cooldown expired"))
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            MarketPhase::Executing => {
                if expired {
                    Some((MarketPhase::Reconciling, "end time reached"))
                } else {
                    None
                }
            }
            // Reconciling -> Done happens only via mark_resolution.
            MarketPhase::Reconciling | MarketPhase::Done => None,
        }
    }

    /// Record that capital has been reserved and orders are going live.
    ///
    /// Legal only from Eligible.
    pub fn mark_execution_started(
        &self,
        token_id: &TokenId,
        reserved: Usd,
        now: DateTime<Utc>,
    ) -> MarketResult<()> {
        let mut markets = self.markets.lock();
        let record = markets
            .get_mut(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))?;

        if record.phase != MarketPhase::Eligible {
            return Err(MarketError::IllegalTransition {
                token_id: token_id.clone(),
                from: record.phase,
                to: MarketPhase::Executing,
                detail: "execution may start only from eligible".to_string(),
            });
        }

        record.reserved = reserved;
        record.transition(MarketPhase::Executing, now, "execution started");
        Ok(())
    }

    /// Record resolution: realized P&L is booked and capital is no longer
    /// reserved here. Legal from Executing or Reconciling.
    pub fn mark_resolution(
        &self,
        token_id: &TokenId,
        pnl: Usd,
        now: DateTime<Utc>,
    ) -> MarketResult<()> {
        let mut markets = self.markets.lock();
        let record = markets
            .get_mut(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))?;

        if !matches!(
            record.phase,
            MarketPhase::Executing | MarketPhase::Reconciling
        ) {
            return Err(MarketError::IllegalTransition {
                token_id: token_id.clone(),
                from: record.phase,
                to: MarketPhase::Done,
                detail: "resolution requires executing or reconciling".to_string(),
            });
        }

        record.realized_pnl = pnl;
        record.reserved = Usd::ZERO;
        record.transition(MarketPhase::Done, now, "resolved");
        Ok(())
    }

    /// Abandon an execution that produced no fill: the reservation is
    /// gone and the market returns to Watching for re-evaluation.
    pub fn mark_execution_abandoned(
        &self,
        token_id: &TokenId,
        now: DateTime<Utc>,
    ) -> MarketResult<()> {
        let mut markets = self.markets.lock();
        let record = markets
            .get_mut(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))?;

        if record.phase != MarketPhase::Executing {
            return Err(MarketError::IllegalTransition {
                token_id: token_id.clone(),
                from: record.phase,
                to: MarketPhase::Watching,
                detail: "abandonment requires executing".to_string(),
            });
        }

        record.reserved = Usd::ZERO;
        record.transition(MarketPhase::Watching, now, "execution abandoned");
        Ok(())
    }

    /// Increment the failure counter; crossing the threshold parks the
    /// market immediately when it is in a watchable phase.
    pub fn mark_failure(
        &self,
        token_id: &TokenId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> MarketResult<u32> {
        let mut markets = self.markets.lock();
        let record = markets
            .get_mut(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))?;

        record.failure_count += 1;
        record.clean_ticks = 0;
        warn!(
            token_id = %token_id,
            count = record.failure_count,
            reason,
            "market failure recorded"
        );

        if record.failure_count > self.config.max_failures_before_hold
            && record.phase.is_watchable()
        {
            record.transition(MarketPhase::OnHold, now, "failure threshold crossed");
        }

        Ok(record.failure_count)
    }

    /// Cleanup path for markets dropped by the source. Refused while
    /// capital is still reserved.
    pub fn drop_market(&self, token_id: &TokenId, now: DateTime<Utc>) -> MarketResult<()> {
        let mut markets = self.markets.lock();
        let record = markets
            .get_mut(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))?;

        if record.phase.is_terminal() {
            return Ok(());
        }
        if record.reserved.is_positive() {
            return Err(MarketError::IllegalTransition {
                token_id: token_id.clone(),
                from: record.phase,
                to: MarketPhase::Done,
                detail: "capital still reserved".to_string(),
            });
        }

        record.transition(MarketPhase::Done, now, "dropped by source");
        Ok(())
    }

    /// Value snapshot of one market.
    pub fn snapshot(&self, token_id: &TokenId) -> MarketResult<MarketSnapshot> {
        let markets = self.markets.lock();
        markets
            .get(token_id)
            .map(MarketRecord::snapshot)
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))
    }

    /// Snapshots of all markets currently in `phase`.
    #[must_use]
    pub fn get_markets_by_state(&self, phase: MarketPhase) -> Vec<MarketSnapshot> {
        let markets = self.markets.lock();
        markets
            .values()
            .filter(|r| r.phase == phase)
            .map(MarketRecord::snapshot)
            .collect()
    }

    /// Transition history of one market.
    pub fn history(&self, token_id: &TokenId) -> MarketResult<Vec<TransitionEvent>> {
        let markets = self.markets.lock();
        markets
            .get(token_id)
            .map(|r| r.history.clone())
            .ok_or_else(|| MarketError::NotFound(token_id.clone()))
    }

    /// Remove Done markets whose terminal transition is older than
    /// `horizon`. Returns the number removed.
    pub fn purge_done_older_than(&self, horizon: Duration, now: DateTime<Utc>) -> usize {
        let mut markets = self.markets.lock();
        let cutoff = now - horizon;
        let before = markets.len();
        markets.retain(|_, r| {
            !(r.phase == MarketPhase::Done && r.done_at.map(|t| t < cutoff).unwrap_or(false))
        });
        let removed = before - markets.len();
        if removed > 0 {
            info!(removed, "purged done markets");
        }
        removed
    }

    /// Maximum tick age in milliseconds across watchable markets.
    ///
    /// Feeds the stale-feed kill switch. `None` when nothing is watched.
    #[must_use]
    pub fn max_watched_tick_age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let markets = self.markets.lock();
        markets
            .values()
            .filter(|r| r.phase.is_watchable())
            .map(|r| match r.last_tick_at {
                Some(t) => (now - t).num_milliseconds(),
                None => i64::MAX,
            })
            .max()
    }

    /// Per-phase counts.
    #[must_use]
    pub fn stats(&self) -> PhaseStats {
        let markets = self.markets.lock();
        let mut stats = PhaseStats {
            total: markets.len(),
            ..PhaseStats::default()
        };
        for r in markets.values() {
            match r.phase {
                MarketPhase::Discovered => stats.discovered += 1,
                MarketPhase::Watching => stats.watching += 1,
                MarketPhase::Eligible => stats.eligible += 1,
                MarketPhase::Executing => stats.executing += 1,
                MarketPhase::Reconciling => stats.reconciling += 1,
                MarketPhase::Done => stats.done += 1,
                MarketPhase::OnHold => stats.on_hold += 1,
            }
        }
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markets.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markets.lock().is_empty()
    }

    /// Sum of reserved capital across all markets. Used by invariant
    /// checks against the allocator's book.
    #[must_use]
    pub fn total_reserved(&self) -> Usd {
        let markets = self.markets.lock();
        markets
            .values()
            .fold(Usd::ZERO, |acc, r| acc + r.reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use snipe_core::ConditionId;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn info(token: &str, end: DateTime<Utc>) -> MarketInfo {
        MarketInfo {
            token_id: TokenId::from(token),
            condition_id: ConditionId::new(format!("cond-{token}")),
            question: format!("Will {token} resolve yes?"),
            end_time: end,
            negative_risk: false,
        }
    }

    fn machine() -> MarketStateMachine {
        MarketStateMachine::new(MachineConfig::default())
    }

    /// Predicate used by most tests: eligible when inside 60s of expiry
    /// with an ask at or below 0.98.
    fn near_expiry(snap: &MarketSnapshot, now: DateTime<Utc>) -> bool {
        snap.phase.is_watchable()
            && snap.time_to_expiry(now) < Duration::seconds(60)
            && snap.time_to_expiry(now) > Duration::zero()
            && snap
                .best_ask
                .map(|a| a.inner() < dec!(0.99))
                .unwrap_or(false)
    }

    #[test]
    fn discovered_to_watching_on_first_tick() {
        let m = machine();
        let now = t0();
        m.add_market(info("tok", now + Duration::seconds(600))).unwrap();

        // No tick yet: no transition.
        assert!(m.check_transitions(now, &near_expiry).is_empty());

        m.update_price(
            &TokenId::from("tok"),
            Price::new(dec!(0.90)),
            Price::new(dec!(0.92)),
            now,
        )
        .unwrap();
        let transitions = m.check_transitions(now, &near_expiry);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, MarketPhase::Discovered);
        assert_eq!(transitions[0].to, MarketPhase::Watching);
    }

    #[test]
    fn sweep_is_idempotent_for_fixed_now() {
        let m = machine();
        let now = t0();
        m.add_market(info("tok", now + Duration::seconds(45))).unwrap();
        m.update_price(
            &TokenId::from("tok"),
            Price::new(dec!(0.95)),
            Price::new(dec!(0.97)),
            now,
        )
        .unwrap();

        // One sweep cascades Discovered -> Watching -> Eligible; the
        // second sweep at the same now observes nothing new.
        let first = m.check_transitions(now, &near_expiry);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].to, MarketPhase::Watching);
        assert_eq!(first[1].to, MarketPhase::Eligible);
        assert!(m.check_transitions(now, &near_expiry).is_empty());
        assert!(m.check_transitions(now, &near_expiry).is_empty());
    }

    #[test]
    fn eligibility_is_not_sticky() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(45))).unwrap();
        m.update_price(&tok, Price::new(dec!(0.95)), Price::new(dec!(0.97)), now)
            .unwrap();
        m.check_transitions(now, &near_expiry);
        m.check_transitions(now, &near_expiry);
        assert_eq!(m.snapshot(&tok).unwrap().phase, MarketPhase::Eligible);

        // Ask moves above the cap; next sweep falls back to Watching.
        let later = now + Duration::milliseconds(100);
        m.update_price(&tok, Price::new(dec!(0.99)), Price::new(dec!(0.995)), later)
            .unwrap();
        let transitions = m.check_transitions(later, &near_expiry);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, MarketPhase::Watching);
    }

    #[test]
    fn stale_feed_parks_and_recovers() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(600))).unwrap();
        m.update_price(&tok, Price::new(dec!(0.5)), Price::new(dec!(0.52)), now)
            .unwrap();
        m.check_transitions(now, &near_expiry);
        assert_eq!(m.snapshot(&tok).unwrap().phase, MarketPhase::Watching);

        // 600ms without a tick exceeds the 500ms default threshold.
        let later = now + Duration::milliseconds(600);
        let transitions = m.check_transitions(later, &near_expiry);
        assert_eq!(transitions[0].to, MarketPhase::OnHold);

        // Fresh tick brings it back.
        let fresh = later + Duration::milliseconds(50);
        m.update_price(&tok, Price::new(dec!(0.5)), Price::new(dec!(0.52)), fresh)
            .unwrap();
        let transitions = m.check_transitions(fresh, &near_expiry);
        assert_eq!(transitions[0].to, MarketPhase::Watching);
    }

    #[test]
    fn failure_threshold_parks_market() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(600))).unwrap();
        m.update_price(&tok, Price::new(dec!(0.5)), Price::new(dec!(0.52)), now)
            .unwrap();
        m.check_transitions(now, &near_expiry);

        for _ in 0..3 {
            m.mark_failure(&tok, "no liquidity", now).unwrap();
        }
        assert_eq!(m.snapshot(&tok).unwrap().phase, MarketPhase::Watching);
        // Fourth failure crosses the `> 3` threshold.
        m.mark_failure(&tok, "no liquidity", now).unwrap();
        assert_eq!(m.snapshot(&tok).unwrap().phase, MarketPhase::OnHold);
    }

    #[test]
    fn failure_counter_decays_after_clean_ticks() {
        let m = MarketStateMachine::new(MachineConfig {
            failure_decay_clean_ticks: 3,
            ..MachineConfig::default()
        });
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(600))).unwrap();

        m.mark_failure(&tok, "timeout", now).unwrap();
        m.mark_failure(&tok, "timeout", now).unwrap();
        assert_eq!(m.snapshot(&tok).unwrap().failure_count, 2);

        for i in 0..3 {
            m.update_price(
                &tok,
                Price::new(dec!(0.5)),
                Price::new(dec!(0.52)),
                now + Duration::milliseconds(i * 100),
            )
            .unwrap();
        }
        assert_eq!(m.snapshot(&tok).unwrap().failure_count, 0);
    }

    #[test]
    fn execution_lifecycle_reaches_done() {
        let m = machine();
        let now = t0();
        let end = now + Duration::seconds(45);
        let tok = TokenId::from("tok");
        m.add_market(info("tok", end)).unwrap();
        m.update_price(&tok, Price::new(dec!(0.95)), Price::new(dec!(0.97)), now)
            .unwrap();
        m.check_transitions(now, &near_expiry);
        m.check_transitions(now, &near_expiry);

        m.mark_execution_started(&tok, Usd::new(dec!(10)), now).unwrap();
        let snap = m.snapshot(&tok).unwrap();
        assert_eq!(snap.phase, MarketPhase::Executing);
        assert_eq!(snap.reserved_capital, Usd::new(dec!(10)));

        // Past end_time: Executing -> Reconciling.
        let after_end = end + Duration::seconds(1);
        let transitions = m.check_transitions(after_end, &near_expiry);
        assert_eq!(transitions[0].to, MarketPhase::Reconciling);

        m.mark_resolution(&tok, Usd::new(dec!(0.30)), after_end).unwrap();
        let snap = m.snapshot(&tok).unwrap();
        assert_eq!(snap.phase, MarketPhase::Done);
        assert_eq!(snap.reserved_capital, Usd::ZERO);
        assert_eq!(snap.realized_pnl, Usd::new(dec!(0.30)));
    }

    #[test]
    fn abandoned_execution_returns_to_watching() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(45))).unwrap();
        m.update_price(&tok, Price::new(dec!(0.95)), Price::new(dec!(0.97)), now)
            .unwrap();
        m.check_transitions(now, &near_expiry);
        m.check_transitions(now, &near_expiry);
        m.mark_execution_started(&tok, Usd::new(dec!(10)), now).unwrap();

        m.mark_execution_abandoned(&tok, now).unwrap();
        let snap = m.snapshot(&tok).unwrap();
        assert_eq!(snap.phase, MarketPhase::Watching);
        assert_eq!(snap.reserved_capital, Usd::ZERO);

        // Only legal from Executing.
        assert!(matches!(
            m.mark_execution_abandoned(&tok, now),
            Err(MarketError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn execution_start_requires_eligible() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(600))).unwrap();

        let err = m
            .mark_execution_started(&tok, Usd::new(dec!(10)), now)
            .unwrap_err();
        assert!(matches!(err, MarketError::IllegalTransition { .. }));
    }

    #[test]
    fn unknown_token_is_typed_not_found() {
        let m = machine();
        let tok = TokenId::from("missing");
        assert!(matches!(
            m.update_price(&tok, Price::new(dec!(0.5)), Price::new(dec!(0.6)), t0()),
            Err(MarketError::NotFound(_))
        ));
        assert!(matches!(m.snapshot(&tok), Err(MarketError::NotFound(_))));
    }

    #[test]
    fn crossed_quote_rejected() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(600))).unwrap();
        assert!(matches!(
            m.update_price(&tok, Price::new(dec!(0.8)), Price::new(dec!(0.7)), now),
            Err(MarketError::InvalidQuote { .. })
        ));
        // Rejected tick does not count as a feed update.
        assert!(m.snapshot(&tok).unwrap().last_tick_at.is_none());
    }

    #[test]
    fn drop_market_refused_while_reserved() {
        let m = machine();
        let now = t0();
        let tok = TokenId::from("tok");
        m.add_market(info("tok", now + Duration::seconds(45))).unwrap();
        m.update_price(&tok, Price::new(dec!(0.95)), Price::new(dec!(0.97)), now)
            .unwrap();
        m.check_transitions(now, &near_expiry);
        m.check_transitions(now, &near_expiry);
        m.mark_execution_started(&tok, Usd::new(dec!(10)), now).unwrap();

        assert!(matches!(
            m.drop_market(&tok, now),
            Err(MarketError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn purge_removes_only_old_done() {
        let m = machine();
        let now = t0();
        m.add_market(info("a", now + Duration::seconds(600))).unwrap();
        m.add_market(info("b", now + Duration::seconds(600))).unwrap();
        m.drop_market(&TokenId::from("a"), now).unwrap();

        let removed = m.purge_done_older_than(Duration::hours(24), now + Duration::hours(1));
        assert_eq!(removed, 0);
        let removed = m.purge_done_older_than(Duration::hours(24), now + Duration::hours(25));
        assert_eq!(removed, 1);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn stats_counts_phases() {
        let m = machine();
        let now = t0();
        m.add_market(info("a", now + Duration::seconds(600))).unwrap();
        m.add_market(info("b", now + Duration::seconds(600))).unwrap();
        m.update_price(
            &TokenId::from("a"),
            Price::new(dec!(0.5)),
            Price::new(dec!(0.52)),
            now,
        )
        .unwrap();
        m.check_transitions(now, &near_expiry);

        let stats = m.stats();
        assert_eq!(stats.watching, 1);
        assert_eq!(stats.discovered, 1);
        assert_eq!(stats.total, 2);
    }
}
