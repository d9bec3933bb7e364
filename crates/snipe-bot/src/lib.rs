//! Engine orchestration.
//!
//! Wires the state machine, scheduler, risk gate, allocator, executor,
//! journal, and metrics into one cooperative runtime: background tasks
//! for market intake, tick dispatch, the transition sweep, the risk
//! monitor, and capital recycling; a single execution worker consuming
//! the expiry queue; and one shutdown signal honored by all of them.

pub mod app;
pub mod config;
pub mod error;
pub mod source;

pub use app::{Engine, ExitStatus};
pub use config::{EngineConfig, RuntimeConfig};
pub use error::{AppError, AppResult};
pub use source::{MarketSource, StaticSource};
