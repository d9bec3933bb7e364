//! Delayed capital release.
//!
//! A cooperative task holding a bounded FIFO of `(token_id, pnl,
//! ready_at)` entries. Each tick releases every entry whose `ready_at`
//! has passed, giving the venue its settlement lag before the capital is
//! free to redeploy. `force_recycle` bypasses the delay.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use snipe_core::{TokenId, Usd};

use crate::allocator::CapitalAllocator;
use crate::error::{CapitalError, CapitalResult};

#[derive(Debug, Clone)]
struct PendingRelease {
    token_id: TokenId,
    pnl: Usd,
    ready_at: DateTime<Utc>,
}

/// One completed release, reported back to the caller of `tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub token_id: TokenId,
    pub amount: Usd,
    pub pnl: Usd,
}

/// Bounded FIFO of pending releases against one allocator.
pub struct Recycler {
    allocator: Arc<CapitalAllocator>,
    delay: Duration,
    capacity: usize,
    queue: Mutex<VecDeque<PendingRelease>>,
}

impl Recycler {
    #[must_use]
    pub fn new(allocator: Arc<CapitalAllocator>, delay_secs: i64, capacity: usize) -> Self {
        Self {
            allocator,
            delay: Duration::seconds(delay_secs),
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Queue a release to fire after the settlement delay.
    pub fn schedule(&self, token_id: TokenId, pnl: Usd, now: DateTime<Utc>) -> CapitalResult<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(CapitalError::RecyclerFull {
                capacity: self.capacity,
            });
        }
        let ready_at = now + self.delay;
        debug!(token_id = %token_id, %pnl, %ready_at, "release scheduled");
        queue.push_back(PendingRelease {
            token_id,
            pnl,
            ready_at,
        });
        Ok(())
    }

    /// Release every entry whose `ready_at` has passed.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Released> {
        let due: Vec<PendingRelease> = {
            let mut queue = self.queue.lock();
            let mut due = Vec::new();
            // FIFO order is preserved: drain from the front while due.
            let mut remaining = VecDeque::with_capacity(queue.len());
            while let Some(entry) = queue.pop_front() {
                if entry.ready_at <= now {
                    due.push(entry);
                } else {
                    remaining.push_back(entry);
                }
            }
            *queue = remaining;
            due
        };

        let mut released = Vec::with_capacity(due.len());
        for entry in due {
            match self.allocator.release_allocation(&entry.token_id, entry.pnl) {
                Ok(amount) => {
                    info!(
                        token_id = %entry.token_id,
                        %amount,
                        pnl = %entry.pnl,
                        "capital recycled"
                    );
                    released.push(Released {
                        token_id: entry.token_id,
                        amount,
                        pnl: entry.pnl,
                    });
                }
                Err(e) => {
                    // Already force-recycled or never reserved; nothing to free.
                    warn!(token_id = %entry.token_id, ?e, "recycle skipped");
                }
            }
        }
        released
    }

    /// Release immediately, bypassing the delay. Removes any queued
    /// entry for the token and applies its P&L.
    pub fn force_recycle(&self, token_id: &TokenId) -> CapitalResult<Released> {
        let pnl = {
            let mut queue = self.queue.lock();
            let pnl = queue
                .iter()
                .find(|e| &e.token_id == token_id)
                .map(|e| e.pnl)
                .unwrap_or(Usd::ZERO);
            queue.retain(|e| &e.token_id != token_id);
            pnl
        };

        let amount = self.allocator.release_allocation(token_id, pnl)?;
        info!(token_id = %token_id, %amount, %pnl, "capital force-recycled");
        Ok(Released {
            token_id: token_id.clone(),
            amount,
            pnl,
        })
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}
