//! Expiry-ordered execution queue.
//!
//! Min-heap keyed by `end_time`, ties broken by insertion order so
//! discovery order is stable. Entries carry only `(token_id, end_time)`;
//! the executor re-reads authoritative state after popping, so stale
//! entries are tolerated and removal uses lazy deletion.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use snipe_core::TokenId;

type HeapKey = Reverse<(DateTime<Utc>, u64, TokenId)>;

/// Priority queue of markets awaiting execution.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    heap: BinaryHeap<HeapKey>,
    /// Live sequence number per token; heap entries with a different
    /// sequence are dead and skipped on pop.
    live: HashMap<TokenId, u64>,
    seq: u64,
}

impl ExpiryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a market. Re-pushing an already queued token replaces its
    /// priority (the old entry dies in place).
    pub fn push(&mut self, token_id: TokenId, end_time: DateTime<Utc>) {
        self.seq += 1;
        self.live.insert(token_id.clone(), self.seq);
        self.heap.push(Reverse((end_time, self.seq, token_id)));
    }

    /// Remove and return the soonest-expiring queued token.
    pub fn pop(&mut self) -> Option<TokenId> {
        while let Some(Reverse((_, seq, token_id))) = self.heap.pop() {
            if self.live.get(&token_id) == Some(&seq) {
                self.live.remove(&token_id);
                return Some(token_id);
            }
            // Dead entry from a replace or remove; skip.
        }
        None
    }

    /// The soonest-expiring queued token, without removing it.
    pub fn peek(&mut self) -> Option<&TokenId> {
        loop {
            let is_live = match self.heap.peek() {
                Some(Reverse((_, seq, token_id))) => self.live.get(token_id) == Some(seq),
                None => return None,
            };
            if is_live {
                break;
            }
            self.heap.pop();
        }
        self.heap.peek().map(|Reverse((_, _, token_id))| token_id)
    }

    /// Re-key a queued token, e.g. after an end-time correction.
    pub fn update_priority(&mut self, token_id: TokenId, end_time: DateTime<Utc>) {
        self.push(token_id, end_time);
    }

    /// Drop a token from the queue (lazy: the heap entry dies in place).
    pub fn remove(&mut self, token_id: &TokenId) {
        self.live.remove(token_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    #[must_use]
    pub fn contains(&self, token_id: &TokenId) -> bool {
        self.live.contains_key(token_id)
    }
}
