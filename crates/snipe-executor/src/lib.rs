//! Order execution.
//!
//! Deduplication, rate limiting, and fill-or-kill dispatch into a
//! synchronous venue client. Blocking venue calls run on the runtime's
//! blocking worker pool under an explicit timeout; every terminal
//! outcome is journaled durably before control returns.

pub mod error;
pub mod executor;
pub mod mock;
pub mod throttle;
pub mod venue;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{Executor, ExecutorConfig, SessionCounters};
pub use mock::MockVenue;
pub use throttle::{DedupeKey, Throttle, ThrottleConfig};
pub use venue::{OrderAck, OrderArgs, SignedOrder, VenueClient};
