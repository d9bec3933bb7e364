//! Scripted venue client for tests and rehearsals.

use std::collections::VecDeque;
use std::sync::mpsc;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use snipe_core::{PriceTick, TokenId, Usd, VenueError};

use crate::venue::{OrderAck, OrderArgs, SignedOrder, VenueClient};

/// In-memory venue with a scripted response queue.
///
/// With no scripted responses, every order fills at its requested
/// price. Scripted entries are consumed front-to-back.
pub struct MockVenue {
    responses: Mutex<VecDeque<Result<OrderAck, VenueError>>>,
    calls: Mutex<Vec<OrderArgs>>,
    balance: Mutex<Usd>,
    tick_senders: Mutex<Vec<mpsc::Sender<PriceTick>>>,
    order_seq: Mutex<u64>,
}

impl MockVenue {
    #[must_use]
    pub fn new(balance: Usd) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            balance: Mutex::new(balance),
            tick_senders: Mutex::new(Vec::new()),
            order_seq: Mutex::new(0),
        }
    }

    /// Script the next post response.
    pub fn enqueue_response(&self, response: Result<OrderAck, VenueError>) {
        self.responses.lock().push_back(response);
    }

    /// Script `n` consecutive rejections.
    pub fn enqueue_rejections(&self, reason: VenueError, n: usize) {
        let mut responses = self.responses.lock();
        for _ in 0..n {
            responses.push_back(Ok(OrderAck::rejected(reason.clone())));
        }
    }

    /// Change the reported wallet balance.
    pub fn set_balance(&self, balance: Usd) {
        *self.balance.lock() = balance;
    }

    /// Push a tick to every subscriber.
    pub fn push_tick(&self, tick: PriceTick) {
        let senders = self.tick_senders.lock();
        for sender in senders.iter() {
            let _ = sender.send(tick.clone());
        }
    }

    /// Orders the engine attempted to post.
    #[must_use]
    pub fn posted(&self) -> Vec<OrderArgs> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn posted_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl VenueClient for MockVenue {
    fn create_market_order(&self, args: &OrderArgs) -> Result<SignedOrder, VenueError> {
        Ok(SignedOrder {
            args: args.clone(),
            signature: format!("mock-sig-{}", args.token_id),
        })
    }

    fn post_order_fok(&self, order: SignedOrder) -> Result<OrderAck, VenueError> {
        self.calls.lock().push(order.args.clone());
        if let Some(scripted) = self.responses.lock().pop_front() {
            return scripted;
        }
        let mut seq = self.order_seq.lock();
        *seq += 1;
        Ok(OrderAck::filled(format!("mock-{}", *seq), order.args.price))
    }

    fn usdc_balance(&self, _wallet_address: &str) -> Result<Usd, VenueError> {
        Ok(*self.balance.lock())
    }

    fn subscribe_price_ticks(&self, _token_ids: &[TokenId]) -> mpsc::Receiver<PriceTick> {
        let (tx, rx) = mpsc::channel();
        self.tick_senders.lock().push(tx);
        rx
    }
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new(Usd::new(Decimal::from(1000)))
    }
}
