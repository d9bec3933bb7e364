//! Pre-trade risk admission.
//!
//! Three sub-policies evaluated in order — global kill switches,
//! per-market circuit breakers, exposure limits — with the first denial
//! winning. The gate prioritizes stopping over trading when in doubt.

pub mod breaker;
pub mod error;
pub mod exposure;
pub mod gate;
pub mod kill_switch;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState};
pub use error::{RiskError, RiskResult};
pub use exposure::ExposureConfig;
pub use gate::{RiskGate, RiskGateConfig};
pub use kill_switch::{KillSwitchConfig, KillSwitchKind, KillSwitchPanel, KillSwitchStatus};
