//! Per-market circuit breakers.
//!
//! Three-state machine per token: Closed -> Open on consecutive
//! failures, Open -> HalfOpen after the recovery timeout, HalfOpen ->
//! Closed on one success or back to Open on one failure. Failure in one
//! market never affects another.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use snipe_core::{GateReason, TokenId};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation, admissions allowed.
    Closed,
    /// Tripped, admissions blocked.
    Open,
    /// Probing recovery with a bounded number of admissions.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

/// Breaker behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip Closed -> Open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds in Open before probing HalfOpen.
    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: i64,
    /// Admissions allowed while HalfOpen.
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout_seconds() -> i64 {
    60
}

fn default_half_open_max_requests() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_admissions: u32,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_admissions: 0,
        }
    }

    /// Open -> HalfOpen once the recovery timeout has elapsed.
    fn maybe_probe(&mut self, config: &BreakerConfig, now: DateTime<Utc>, token_id: &TokenId) {
        if self.state != BreakerState::Open {
            return;
        }
        let due = self
            .last_failure_at
            .map(|t| (now - t).num_seconds() >= config.recovery_timeout_seconds)
            .unwrap_or(true);
        if due {
            info!(token_id = %token_id, "breaker open -> half_open");
            self.state = BreakerState::HalfOpen;
            self.half_open_admissions = 0;
        }
    }
}

/// Registry managing one breaker per market, created on demand.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<TokenId, Breaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Ask for admission. A granted half-open admission counts against
    /// the probe budget until resolved by success or failure.
    pub fn try_admit(&self, token_id: &TokenId, now: DateTime<Utc>) -> Result<(), GateReason> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(token_id.clone())
            .or_insert_with(Breaker::new);
        breaker.maybe_probe(&self.config, now, token_id);

        match breaker.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(GateReason::BreakerOpen),
            BreakerState::HalfOpen => {
                if breaker.half_open_admissions < self.config.half_open_max_requests {
                    breaker.half_open_admissions += 1;
                    Ok(())
                } else {
                    Err(GateReason::BreakerOpen)
                }
            }
        }
    }

    /// Record a successful execution. HalfOpen recovers to Closed.
    pub fn record_success(&self, token_id: &TokenId) {
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(token_id) else {
            return;
        };
        match breaker.state {
            BreakerState::Closed => breaker.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                info!(token_id = %token_id, "breaker half_open -> closed");
                breaker.state = BreakerState::Closed;
                breaker.consecutive_failures = 0;
                breaker.half_open_admissions = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed execution. Trips at the threshold; a HalfOpen
    /// failure reopens immediately.
    pub fn record_failure(&self, token_id: &TokenId, reason: &str, now: DateTime<Utc>) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(token_id.clone())
            .or_insert_with(Breaker::new);
        breaker.last_failure_at = Some(now);
        breaker.consecutive_failures += 1;

        match breaker.state {
            BreakerState::HalfOpen => {
                warn!(token_id = %token_id, reason, "breaker half_open failure, reopening");
                breaker.state = BreakerState::Open;
                breaker.consecutive_failures = self.config.failure_threshold;
                breaker.half_open_admissions = 0;
            }
            BreakerState::Closed => {
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        token_id = %token_id,
                        failures = breaker.consecutive_failures,
                        reason,
                        "breaker closed -> open"
                    );
                    breaker.state = BreakerState::Open;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Current state, probing Open -> HalfOpen first.
    #[must_use]
    pub fn state(&self, token_id: &TokenId, now: DateTime<Utc>) -> BreakerState {
        let mut breakers = self.breakers.lock();
        match breakers.get_mut(token_id) {
            Some(breaker) => {
                breaker.maybe_probe(&self.config, now, token_id);
                breaker.state
            }
            None => BreakerState::Closed,
        }
    }

    /// Tokens whose breakers are currently not Closed.
    #[must_use]
    pub fn tripped(&self) -> Vec<TokenId> {
        let breakers = self.breakers.lock();
        breakers
            .iter()
            .filter(|(_, b)| b.state != BreakerState::Closed)
            .map(|(t, _)| t.clone())
            .collect()
    }
}
