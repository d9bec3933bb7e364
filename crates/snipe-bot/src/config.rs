//! Engine configuration.
//!
//! One TOML file covers the whole recognized surface; every section has
//! serde defaults so a minimal file runs. Validation failures are
//! configuration errors (exit code 1), caught before anything starts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use snipe_capital::CapitalConfig;
use snipe_core::Usd;
use snipe_detector::SnipeConfig;
use snipe_executor::ExecutorConfig;
use snipe_journal::JournalConfig;
use snipe_market::MachineConfig;
use snipe_risk::RiskGateConfig;
use snipe_telemetry::{AlertThresholds, MetricsConfig};

use crate::error::{AppError, AppResult};

/// Orchestration-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Transition sweep cadence.
    #[serde(default = "default_transition_sweep_interval_ms")]
    pub transition_sweep_interval_ms: u64,
    /// Grace period for in-flight work at shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Capital requested per admitted market; grants may be smaller.
    #[serde(default = "default_stake_per_market")]
    pub stake_per_market: Usd,
    /// Market source poll cadence.
    #[serde(default = "default_market_poll_interval_ms")]
    pub market_poll_interval_ms: u64,
    /// Worker sleep when the queue is empty.
    #[serde(default = "default_worker_idle_ms")]
    pub worker_idle_ms: u64,
    /// Done markets are purged after this retention.
    #[serde(default = "default_done_retention_hours")]
    pub done_retention_hours: i64,
    /// A kill-switch halt lasting longer than this ends the process
    /// with exit code 3.
    #[serde(default = "default_halt_exit_secs")]
    pub halt_exit_secs: i64,
    /// Cadence of bankroll reconciliation against the venue wallet.
    /// Only runs when `wallet_address` is configured.
    #[serde(default = "default_wallet_sync_interval_secs")]
    pub wallet_sync_interval_secs: u64,
    /// Venue fee as a fraction of gross winnings, applied centrally in
    /// the payout model.
    #[serde(default)]
    pub fee_rate: Decimal,
}

fn default_transition_sweep_interval_ms() -> u64 {
    200
}

fn default_shutdown_grace_ms() -> u64 {
    3000
}

fn default_stake_per_market() -> Usd {
    Usd::new(Decimal::from(10))
}

fn default_market_poll_interval_ms() -> u64 {
    5000
}

fn default_worker_idle_ms() -> u64 {
    50
}

fn default_done_retention_hours() -> i64 {
    24
}

fn default_halt_exit_secs() -> i64 {
    900
}

fn default_wallet_sync_interval_secs() -> u64 {
    300
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transition_sweep_interval_ms: default_transition_sweep_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stake_per_market: default_stake_per_market(),
            market_poll_interval_ms: default_market_poll_interval_ms(),
            worker_idle_ms: default_worker_idle_ms(),
            done_retention_hours: default_done_retention_hours(),
            halt_exit_secs: default_halt_exit_secs(),
            wallet_sync_interval_secs: default_wallet_sync_interval_secs(),
            fee_rate: Decimal::ZERO,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bankroll handed to the allocator at startup.
    #[serde(default = "default_initial_bankroll")]
    pub initial_bankroll: Usd,
    /// Trading wallet, for balance reconciliation.
    #[serde(default)]
    pub wallet_address: String,
    /// Synthetic fills: no `post_order` reaches the venue.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub eligibility: SnipeConfig,
    #[serde(default)]
    pub market: MachineConfig,
    #[serde(default)]
    pub risk: RiskGateConfig,
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub alerts: AlertThresholds,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_initial_bankroll() -> Usd {
    Usd::new(Decimal::from(1000))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_bankroll: default_initial_bankroll(),
            wallet_address: String::new(),
            dry_run: false,
            eligibility: SnipeConfig::default(),
            market: MachineConfig::default(),
            risk: RiskGateConfig::default(),
            capital: CapitalConfig::default(),
            executor: ExecutorConfig::default(),
            journal: JournalConfig::default(),
            metrics: MetricsConfig::default(),
            alerts: AlertThresholds::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Parameter coherence checks.
    pub fn validate(&self) -> AppResult<()> {
        if !self.initial_bankroll.is_positive() {
            return Err(AppError::Config(format!(
                "initial_bankroll must be positive, got {}",
                self.initial_bankroll
            )));
        }
        if !self.runtime.stake_per_market.is_positive() {
            return Err(AppError::Config(format!(
                "stake_per_market must be positive, got {}",
                self.runtime.stake_per_market
            )));
        }
        self.eligibility.validate().map_err(AppError::Config)?;
        if self.runtime.wallet_sync_interval_secs == 0 {
            return Err(AppError::Config(
                "wallet_sync_interval_secs must be positive".to_string(),
            ));
        }
        if self.runtime.fee_rate < Decimal::ZERO || self.runtime.fee_rate >= Decimal::ONE {
            return Err(AppError::Config(format!(
                "fee_rate must lie in [0, 1), got {}",
                self.runtime.fee_rate
            )));
        }
        Ok(())
    }

    /// Executor config with the top-level dry_run flag folded in.
    #[must_use]
    pub fn effective_executor(&self) -> ExecutorConfig {
        let mut executor = self.executor.clone();
        executor.dry_run = executor.dry_run || self.dry_run;
        executor
    }
}
