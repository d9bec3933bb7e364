//! Expiration-sniping eligibility evaluation.
//!
//! The evaluator is the only strategy-specific piece of the engine: a
//! pure, deterministic predicate over a market snapshot deciding whether
//! the market is inside the strike window with enough edge to buy.

pub mod config;
pub mod eligibility;

pub use config::SnipeConfig;
pub use eligibility::{EligibilityEvaluator, Ineligible, SnipeSignal};
