//! Market lifecycle state machine and expiry-ordered scheduler.
//!
//! The state machine exclusively owns all market records; everything
//! else sees value snapshots. The scheduler holds only `(token_id,
//! end_time)` pairs and tolerates stale entries.

pub mod error;
pub mod machine;
pub mod queue;

pub use error::{MarketError, MarketResult};
pub use machine::{MachineConfig, MarketStateMachine, PhaseStats, Transition, TransitionEvent};
pub use queue::ExpiryQueue;
