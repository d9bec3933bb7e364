//! Global kill switches.
//!
//! Any active switch halts all admissions. Condition-driven switches
//! (StaleFeed, RpcLag, MaxOrders) clear only after their condition has
//! been clean for a debounce period; DailyLoss resets at UTC midnight;
//! Manual clears only by operator call. Once triggered, activation is
//! logged once at high visibility and re-logged on a throttled cadence.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use snipe_core::{Clock, GateReason, Usd};

/// Kill switch trigger types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchKind {
    StaleFeed,
    RpcLag,
    MaxOrders,
    DailyLoss,
    Manual,
}

impl KillSwitchKind {
    #[must_use]
    pub fn gate_reason(&self) -> GateReason {
        match self {
            Self::StaleFeed => GateReason::StaleFeedHalt,
            Self::RpcLag => GateReason::RpcLagHalt,
            Self::MaxOrders => GateReason::MaxOrdersHalt,
            Self::DailyLoss => GateReason::DailyLossHalt,
            Self::Manual => GateReason::ManualHalt,
        }
    }

    /// Switches that deactivate automatically once their condition has
    /// been clean for the debounce period.
    fn auto_clears(&self) -> bool {
        matches!(self, Self::StaleFeed | Self::RpcLag | Self::MaxOrders)
    }
}

impl std::fmt::Display for KillSwitchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StaleFeed => "stale_feed",
            Self::RpcLag => "rpc_lag",
            Self::MaxOrders => "max_orders",
            Self::DailyLoss => "daily_loss",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Halt when the freshest watched feed is older than this.
    #[serde(default = "default_stale_feed_threshold_ms")]
    pub stale_feed_threshold_ms: i64,
    /// Halt when rolling p95 decision-to-ack latency exceeds this.
    #[serde(default = "default_rpc_lag_threshold_ms")]
    pub rpc_lag_threshold_ms: i64,
    /// Halt when outstanding orders reach this count.
    #[serde(default = "default_max_outstanding_orders")]
    pub max_outstanding_orders: u32,
    /// Halt when daily realized loss exceeds this percent of the
    /// day-open bankroll.
    #[serde(default = "default_daily_loss_limit_percent")]
    pub daily_loss_limit_percent: Decimal,
    /// Condition must be clean this long before an auto switch clears.
    #[serde(default = "default_clear_debounce_ms")]
    pub clear_debounce_ms: i64,
    /// Re-log cadence while a switch stays active.
    #[serde(default = "default_halt_relog_secs")]
    pub halt_relog_secs: i64,
}

fn default_stale_feed_threshold_ms() -> i64 {
    500
}

fn default_rpc_lag_threshold_ms() -> i64 {
    300
}

fn default_max_outstanding_orders() -> u32 {
    10
}

fn default_daily_loss_limit_percent() -> Decimal {
    Decimal::from(5)
}

fn default_clear_debounce_ms() -> i64 {
    2000
}

fn default_halt_relog_secs() -> i64 {
    30
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            stale_feed_threshold_ms: default_stale_feed_threshold_ms(),
            rpc_lag_threshold_ms: default_rpc_lag_threshold_ms(),
            max_outstanding_orders: default_max_outstanding_orders(),
            daily_loss_limit_percent: default_daily_loss_limit_percent(),
            clear_debounce_ms: default_clear_debounce_ms(),
            halt_relog_secs: default_halt_relog_secs(),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveSwitch {
    reason: String,
    since: DateTime<Utc>,
    last_logged: DateTime<Utc>,
}

struct PanelState {
    active: HashMap<KillSwitchKind, ActiveSwitch>,
    /// When each auto-clearing condition was last observed clean.
    clean_since: HashMap<KillSwitchKind, DateTime<Utc>>,
    daily_pnl: Usd,
    day_open_bankroll: Usd,
    outstanding_orders: u32,
    current_day: NaiveDate,
}

/// Status report for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub active: Vec<(KillSwitchKind, String)>,
    pub daily_pnl: Usd,
    pub outstanding_orders: u32,
}

/// Global kill-switch panel.
pub struct KillSwitchPanel {
    config: KillSwitchConfig,
    clock: Clock,
    state: Mutex<PanelState>,
}

impl KillSwitchPanel {
    #[must_use]
    pub fn new(config: KillSwitchConfig, clock: Clock, day_open_bankroll: Usd) -> Self {
        let today = clock.now_utc().date_naive();
        Self {
            config,
            clock,
            state: Mutex::new(PanelState {
                active: HashMap::new(),
                clean_since: HashMap::new(),
                daily_pnl: Usd::ZERO,
                day_open_bankroll,
                outstanding_orders: 0,
                current_day: today,
            }),
        }
    }

    /// First active switch, if any, as a gate reason.
    #[must_use]
    pub fn halted(&self) -> Option<GateReason> {
        let state = self.state.lock();
        // Deterministic precedence: feed health before lag before limits.
        for kind in [
            KillSwitchKind::Manual,
            KillSwitchKind::StaleFeed,
            KillSwitchKind::RpcLag,
            KillSwitchKind::MaxOrders,
            KillSwitchKind::DailyLoss,
        ] {
            if state.active.contains_key(&kind) {
                return Some(kind.gate_reason());
            }
        }
        None
    }

    /// Feed the freshest-watched-market tick age. Activates or
    /// (debounced) clears the StaleFeed switch.
    pub fn observe_feed_age(&self, max_age_ms: i64) {
        if max_age_ms > self.config.stale_feed_threshold_ms {
            self.activate(
                KillSwitchKind::StaleFeed,
                format!(
                    "feed stale for {max_age_ms}ms (threshold {}ms)",
                    self.config.stale_feed_threshold_ms
                ),
            );
        } else {
            self.observe_clean(KillSwitchKind::StaleFeed);
        }
    }

    /// Feed the rolling p95 decision-to-ack latency.
    pub fn observe_ack_p95(&self, p95_ms: f64) {
        if p95_ms > self.config.rpc_lag_threshold_ms as f64 {
            self.activate(
                KillSwitchKind::RpcLag,
                format!(
                    "p95 ack {p95_ms:.0}ms (threshold {}ms)",
                    self.config.rpc_lag_threshold_ms
                ),
            );
        } else {
            self.observe_clean(KillSwitchKind::RpcLag);
        }
    }

    /// Track the outstanding-order count.
    pub fn observe_outstanding(&self, count: u32) {
        {
            let mut state = self.state.lock();
            state.outstanding_orders = count;
        }
        if count >= self.config.max_outstanding_orders {
            self.activate(
                KillSwitchKind::MaxOrders,
                format!(
                    "outstanding orders {count} >= {}",
                    self.config.max_outstanding_orders
                ),
            );
        } else {
            self.observe_clean(KillSwitchKind::MaxOrders);
        }
    }

    /// Book a realized P&L delta and re-check the daily loss limit.
    pub fn record_pnl(&self, delta: Usd) {
        let (loss_breached, loss, limit) = {
            let mut state = self.state.lock();
            state.daily_pnl += delta;
            let limit = Usd::new(
                state.day_open_bankroll.inner() * self.config.daily_loss_limit_percent
                    / Decimal::from(100),
            );
            let loss = -state.daily_pnl;
            (loss > limit && limit.is_positive(), loss, limit)
        };

        if loss_breached {
            self.activate(
                KillSwitchKind::DailyLoss,
                format!("daily loss {loss} exceeds {limit}"),
            );
        }
    }

    /// Reset daily counters when the UTC date rolls over. DailyLoss
    /// deactivates here and only here.
    pub fn roll_day_if_needed(&self, day_open_bankroll: Usd) {
        let today = self.clock.now_utc().date_naive();
        let rolled = {
            let mut state = self.state.lock();
            if state.current_day == today {
                false
            } else {
                state.current_day = today;
                state.daily_pnl = Usd::ZERO;
                state.day_open_bankroll = day_open_bankroll;
                state.active.remove(&KillSwitchKind::DailyLoss).is_some()
            }
        };
        if rolled {
            warn!(switch = %KillSwitchKind::DailyLoss, "kill switch cleared at UTC midnight");
        }
    }

    /// Operator halt.
    pub fn engage_manual(&self, reason: impl Into<String>) {
        self.activate(KillSwitchKind::Manual, reason.into());
    }

    /// Operator release of the manual halt.
    pub fn release_manual(&self) {
        let removed = self.state.lock().active.remove(&KillSwitchKind::Manual);
        if let Some(active) = removed {
            warn!(reason = %active.reason, "manual kill switch released");
        }
    }

    /// Emit a throttled reminder for every switch still active.
    pub fn relog_active(&self) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        for (kind, active) in state.active.iter_mut() {
            if (now - active.last_logged).num_seconds() >= self.config.halt_relog_secs {
                active.last_logged = now;
                warn!(
                    switch = %kind,
                    reason = %active.reason,
                    active_for_secs = (now - active.since).num_seconds(),
                    "kill switch still active"
                );
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> KillSwitchStatus {
        let state = self.state.lock();
        KillSwitchStatus {
            active: state
                .active
                .iter()
                .map(|(k, a)| (*k, a.reason.clone()))
                .collect(),
            daily_pnl: state.daily_pnl,
            outstanding_orders: state.outstanding_orders,
        }
    }

    #[must_use]
    pub fn daily_pnl(&self) -> Usd {
        self.state.lock().daily_pnl
    }

    fn activate(&self, kind: KillSwitchKind, reason: String) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        state.clean_since.remove(&kind);
        if !state.active.contains_key(&kind) {
            error!(switch = %kind, reason = %reason, "KILL SWITCH ACTIVATED");
            state.active.insert(
                kind,
                ActiveSwitch {
                    reason,
                    since: now,
                    last_logged: now,
                },
            );
        }
    }

    /// Record a clean observation; deactivate after the debounce window.
    fn observe_clean(&self, kind: KillSwitchKind) {
        if !kind.auto_clears() {
            return;
        }
        let now = self.clock.now_utc();
        let cleared = {
            let mut state = self.state.lock();
            if !state.active.contains_key(&kind) {
                state.clean_since.remove(&kind);
                return;
            }
            let since = *state.clean_since.entry(kind).or_insert(now);
            if (now - since).num_milliseconds() >= self.config.clear_debounce_ms {
                state.active.remove(&kind);
                state.clean_since.remove(&kind);
                true
            } else {
                false
            }
        };
        if cleared {
            warn!(switch = %kind, "kill switch cleared after debounce");
        } else {
            debug!(switch = %kind, "condition clean, debounce pending");
        }
    }
}
