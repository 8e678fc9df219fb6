//! Wire shapes of the external feeds. Only the fields the engine reads.

use serde::Deserialize;

/// `GET /openApi/spot/v1/ticker/price`
#[derive(Debug, Deserialize)]
pub struct TickerEnvelope {
    #[serde(default)]
    pub data: Vec<TickerData>,
}

#[derive(Debug, Deserialize)]
pub struct TickerData {
    #[serde(default)]
    pub trades: Vec<Trade>,
}

#[derive(Debug, Deserialize)]
pub struct Trade {
    /// Sent as a string by the exchange.
    pub price: serde_json::Value,
    /// Milliseconds.
    pub timestamp: i64,
}

/// `GET /openApi/market/his/v1/kline`; each candle is
/// `[open_time, open, high, low, close, ...]`.
#[derive(Debug, Deserialize)]
pub struct KlineEnvelope {
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
}
