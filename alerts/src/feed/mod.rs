//! Price and currency-rate sources.
//!
//! The engine only depends on the [`PriceFeed`] and [`RateConverter`] traits;
//! the HTTP clients here are the production implementations.

pub mod bingx;
pub mod errors;
pub mod rates;
pub mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;

pub use bingx::BingxClient;
pub use errors::FeedError;
pub use rates::RatesClient;

/// One price point in the feed's native currency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceSample {
    pub price: Decimal,
    /// Unix seconds.
    pub ts: i64,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest traded price.
    async fn current(&self, asset: &str) -> Result<PriceSample, FeedError>;

    /// Price at `ts` (Unix seconds), resolved to the containing minute.
    async fn price_at(&self, asset: &str, ts: i64) -> Result<PriceSample, FeedError>;
}

#[async_trait]
pub trait RateConverter: Send + Sync {
    /// Multiplier from the feed's native currency into `quote_currency`.
    async fn rate(&self, quote_currency: &str) -> Result<Decimal, FeedError>;
}
