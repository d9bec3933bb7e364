//! Core domain types for the expiration-sniper engine.
//!
//! This crate provides the fundamental vocabulary shared by every subsystem:
//! - `TokenId`, `ConditionId`: market identifiers
//! - `Price`, `Usd`: precision-safe numeric types
//! - `OrderRequest`, `Side`, `Action`: order construction
//! - `TradeOutcome`, `GateReason`, `VenueError`: typed execution outcomes
//! - `Clock`: shared wall/monotonic time source

pub mod clock;
pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod outcome;
pub mod payout;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock, TimeSource};
pub use decimal::{Price, Usd};
pub use error::{CoreError, Result};
pub use market::{ConditionId, MarketInfo, MarketPhase, MarketSnapshot, PriceTick, TokenId};
pub use order::{Action, CorrelationId, OrderRequest, Side};
pub use outcome::{GateReason, TradeOutcome, VenueError};
pub use payout::PayoutModel;
pub use view::ExposureView;
