//! Shared time source.
//!
//! Wall time (UTC) drives expiry and day rollover; monotonic milliseconds
//! drive latency measurement. Components take a `Clock` handle at
//! construction so tests can run against a manually advanced clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Source of wall-clock and monotonic time.
pub trait TimeSource: Send + Sync {
    /// Current wall time, UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Milliseconds on a monotonic axis (origin is unspecified but fixed).
    fn monotonic_ms(&self) -> u64;
}

/// Shared handle to a time source.
pub type Clock = Arc<dyn TimeSource>;

/// Production clock backed by `Utc::now()` and `Instant`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Convenience constructor returning a shared handle.
    #[must_use]
    pub fn shared() -> Clock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

struct ManualState {
    wall: DateTime<Utc>,
    mono_ms: u64,
}

/// Test clock advanced explicitly. Both axes move together.
pub struct ManualClock {
    state: parking_lot::Mutex<ManualState>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: parking_lot::Mutex::new(ManualState {
                wall: start,
                mono_ms: 0,
            }),
        }
    }

    /// Shared handle, keeping a typed reference for `advance` calls.
    #[must_use]
    pub fn shared(start: DateTime<Utc>) -> (Arc<Self>, Clock) {
        let clock = Arc::new(Self::new(start));
        let handle: Clock = clock.clone();
        (clock, handle)
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.wall += by;
        state.mono_ms += by.num_milliseconds().max(0) as u64;
    }

    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    pub fn set_wall(&self, wall: DateTime<Utc>) {
        self.state.lock().wall = wall;
    }
}

impl TimeSource for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.state.lock().wall
    }

    fn monotonic_ms(&self) -> u64 {
        self.state.lock().mono_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances_both_axes() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        assert_eq!(clock.monotonic_ms(), 0);
        clock.advance_ms(1500);
        assert_eq!(clock.monotonic_ms(), 1500);
        assert_eq!(clock.now_utc(), start + Duration::milliseconds(1500));
    }

    #[test]
    fn system_clock_monotonic_is_nondecreasing() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
    }
}
