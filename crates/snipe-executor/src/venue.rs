//! Venue client interface.
//!
//! The venue's REST/WebSocket protocol and order signing live outside
//! the core; the engine consumes this blocking interface and wraps
//! every call in a timeout on the blocking worker pool.

use snipe_core::{Action, Price, PriceTick, Side, TokenId, Usd, VenueError};

/// Arguments for building a market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderArgs {
    pub token_id: TokenId,
    pub amount_usd: Usd,
    pub side: Side,
    pub action: Action,
    /// Worst acceptable fill price.
    pub price: Price,
    pub negative_risk: bool,
}

/// Signed order blob, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOrder {
    pub args: OrderArgs,
    pub signature: String,
}

/// Venue response to a fill-or-kill post. FOK semantics: the order is
/// either entirely filled or not at all; partial fills do not occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub accepted: bool,
    pub venue_order_id: Option<String>,
    pub reject_reason: Option<VenueError>,
    pub fill_price: Option<Price>,
}

impl OrderAck {
    #[must_use]
    pub fn filled(order_id: impl Into<String>, price: Price) -> Self {
        Self {
            accepted: true,
            venue_order_id: Some(order_id.into()),
            reject_reason: None,
            fill_price: Some(price),
        }
    }

    #[must_use]
    pub fn rejected(reason: VenueError) -> Self {
        Self {
            accepted: false,
            venue_order_id: None,
            reject_reason: Some(reason),
            fill_price: None,
        }
    }
}

/// Blocking venue client.
///
/// All methods may block on network I/O; the executor never calls them
/// from the cooperative control path.
pub trait VenueClient: Send + Sync + 'static {
    /// Build and sign a market order.
    fn create_market_order(&self, args: &OrderArgs) -> Result<SignedOrder, VenueError>;

    /// Post a signed order fill-or-kill.
    fn post_order_fok(&self, order: SignedOrder) -> Result<OrderAck, VenueError>;

    /// Current USDC balance of the trading wallet.
    fn usdc_balance(&self, wallet_address: &str) -> Result<Usd, VenueError>;

    /// Subscribe to top-of-book ticks for the given tokens. The stream
    /// is consumed by a bridging task, never by control logic directly.
    fn subscribe_price_ticks(&self, token_ids: &[TokenId]) -> std::sync::mpsc::Receiver<PriceTick>;
}
