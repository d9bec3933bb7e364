//! Order construction types.
//!
//! `OrderRequest` validates its invariants at construction; a rejected
//! construction is a programmer error, not a runtime trade outcome.

use crate::decimal::{Price, Usd};
use crate::error::CoreError;
use crate::market::TokenId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Returns the opposite outcome token.
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
        }
    }
}

/// Order action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Correlation id threading one attempt through journal, metrics, and logs.
///
/// Format: `snipe_{timestamp_ms}_{uuid_short}`. Unique per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new unique correlation id stamped with the given wall time.
    #[must_use]
    pub fn new(now_ms: i64) -> Self {
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("snipe_{now_ms}_{uuid_short}"))
    }

    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ephemeral value constructed at dispatch time.
///
/// Invariants (`size > 0` and within cap, `price` in (0,1), non-empty
/// token) are enforced by [`OrderRequest::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token_id: TokenId,
    pub side: Side,
    pub action: Action,
    /// Order size in USD.
    pub size: Usd,
    /// Limit of acceptability for the fill price.
    pub price: Price,
    /// Strategy tag recorded in the journal.
    pub strategy: String,
    pub correlation_id: CorrelationId,
}

impl OrderRequest {
    /// Construct a validated order request.
    ///
    /// `max_size` is the configured per-order cap; a size exactly at the
    /// cap is accepted.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token_id: TokenId,
        side: Side,
        action: Action,
        size: Usd,
        price: Price,
        strategy: impl Into<String>,
        max_size: Usd,
        correlation_id: CorrelationId,
    ) -> Result<Self, CoreError> {
        if token_id.is_empty() {
            return Err(CoreError::InvalidTokenId("empty token id".to_string()));
        }
        if !size.is_positive() {
            return Err(CoreError::InvalidSize(format!("size {size} must be > 0")));
        }
        if size > max_size {
            return Err(CoreError::InvalidSize(format!(
                "size {size} exceeds cap {max_size}"
            )));
        }
        if !price.is_tradeable() {
            return Err(CoreError::InvalidPrice(format!(
                "price {price} outside (0, 1)"
            )));
        }

        Ok(Self {
            token_id,
            side,
            action,
            size,
            price,
            strategy: strategy.into(),
            correlation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(size: rust_decimal::Decimal, price: rust_decimal::Decimal) -> Result<OrderRequest, CoreError> {
        OrderRequest::new(
            TokenId::from("tok-1"),
            Side::Yes,
            Action::Buy,
            Usd::new(size),
            Price::new(price),
            "expiry-snipe",
            Usd::new(dec!(50)),
            CorrelationId::new(0),
        )
    }

    #[test]
    fn zero_size_rejected() {
        assert!(matches!(
            request(dec!(0), dec!(0.97)),
            Err(CoreError::InvalidSize(_))
        ));
    }

    #[test]
    fn size_at_cap_accepted() {
        assert!(request(dec!(50), dec!(0.97)).is_ok());
        assert!(matches!(
            request(dec!(50.01), dec!(0.97)),
            Err(CoreError::InvalidSize(_))
        ));
    }

    #[test]
    fn price_must_be_strictly_interior() {
        assert!(matches!(
            request(dec!(10), dec!(0)),
            Err(CoreError::InvalidPrice(_))
        ));
        assert!(matches!(
            request(dec!(10), dec!(1)),
            Err(CoreError::InvalidPrice(_))
        ));
        assert!(request(dec!(10), dec!(0.99)).is_ok());
    }

    #[test]
    fn correlation_ids_unique() {
        let a = CorrelationId::new(1000);
        let b = CorrelationId::new(1000);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("snipe_1000_"));
    }
}
