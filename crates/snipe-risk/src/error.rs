//! Error types for snipe-risk.
//!
//! Gate denials are values (`GateReason`), not errors; this enum covers
//! only genuine misuse.

use thiserror::Error;

/// Risk subsystem errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("invalid risk configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for risk operations.
pub type RiskResult<T> = std::result::Result<T, RiskError>;
