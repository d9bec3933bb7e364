//! Durable trade journal.
//!
//! Append-only JSON Lines ledger, segmented daily by UTC date. Writes
//! are fsynced before success is returned, so a crash cannot leave a
//! filled-but-unrecorded state. The journal is a ledger, not a message
//! bus: consumers read it out-of-band.

pub mod error;
pub mod journal;
pub mod record;

pub use error::{JournalError, JournalResult};
pub use journal::{JournalConfig, TradeJournal};
pub use record::{JournalEntry, ReleaseRecord, TradeRecord};
