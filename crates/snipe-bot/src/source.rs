//! Upstream market source.
//!
//! Market discovery happens outside the core; the engine consumes this
//! pull interface, already filtered to the configured asset set and
//! duration window.

use snipe_core::MarketInfo;

/// Pull interface yielding newly discovered markets.
pub trait MarketSource: Send + 'static {
    /// Markets discovered since the last poll. May be empty.
    fn poll(&mut self) -> Vec<MarketInfo>;
}

/// Fixed batch source: yields its markets once, then nothing.
pub struct StaticSource {
    batch: Option<Vec<MarketInfo>>,
}

impl StaticSource {
    #[must_use]
    pub fn new(markets: Vec<MarketInfo>) -> Self {
        Self {
            batch: Some(markets),
        }
    }
}

impl MarketSource for StaticSource {
    fn poll(&mut self) -> Vec<MarketInfo> {
        self.batch.take().unwrap_or_default()
    }
}
