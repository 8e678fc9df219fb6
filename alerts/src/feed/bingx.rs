use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::errors::FeedError;
use super::types::{KlineEnvelope, TickerEnvelope};
use super::{PriceFeed, PriceSample};
use crate::numeric::parse_lenient;

const MINUTE_MS: i64 = 60_000;

/// Spot price feed backed by the BingX public API. Prices are in USDT.
#[derive(Clone)]
pub struct BingxClient {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl BingxClient {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn symbol(asset: &str) -> String {
        format!("{}-USDT", asset.trim().to_ascii_uppercase())
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String, FeedError> {
        let mut req = self.http.get(format!("{}{}", self.url, path)).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("X-BX-APIKEY", key);
        }
        let resp = req.send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PriceFeed for BingxClient {
    #[instrument(skip(self), target = "feed", level = "debug")]
    async fn current(&self, asset: &str) -> Result<PriceSample, FeedError> {
        let body = self
            .get_text(
                "/openApi/spot/v1/ticker/price",
                &[("symbol", Self::symbol(asset))],
            )
            .await?;

        let sample = parse_ticker(&body)?;
        debug!(price = %sample.price, ts = sample.ts, "spot price fetched");
        Ok(sample)
    }

    #[instrument(skip(self), target = "feed", level = "debug")]
    async fn price_at(&self, asset: &str, ts: i64) -> Result<PriceSample, FeedError> {
        let start_ms = minute_floor_ms(ts);

        let body = self
            .get_text(
                "/openApi/market/his/v1/kline",
                &[
                    ("symbol", Self::symbol(asset)),
                    ("interval", "1m".to_string()),
                    ("startTime", start_ms.to_string()),
                    ("endTime", (start_ms + MINUTE_MS).to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let sample = parse_kline(&body, start_ms)?;
        debug!(price = %sample.price, ts = sample.ts, "historical price fetched");
        Ok(sample)
    }
}

/// Start of the minute containing `ts`, in milliseconds.
///
/// Values below 10^12 are taken as seconds, larger ones as milliseconds.
pub fn minute_floor_ms(ts: i64) -> i64 {
    let ms = if ts < 1_000_000_000_000 { ts * 1000 } else { ts };
    ms.div_euclid(MINUTE_MS) * MINUTE_MS
}

pub fn parse_ticker(body: &str) -> Result<PriceSample, FeedError> {
    let env: TickerEnvelope =
        serde_json::from_str(body).map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

    let trade = env
        .data
        .first()
        .and_then(|d| d.trades.first())
        .ok_or_else(|| FeedError::InvalidResponse("no trades in ticker response".into()))?;

    Ok(PriceSample {
        price: value_to_decimal(&trade.price)?,
        ts: trade.timestamp / 1000,
    })
}

pub fn parse_kline(body: &str, start_ms: i64) -> Result<PriceSample, FeedError> {
    let env: KlineEnvelope =
        serde_json::from_str(body).map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

    let open = env
        .data
        .first()
        .and_then(|candle| candle.get(1))
        .ok_or_else(|| FeedError::InvalidResponse("no candlestick data".into()))?;

    Ok(PriceSample {
        price: value_to_decimal(open)?,
        ts: start_ms / 1000,
    })
}

fn value_to_decimal(v: &serde_json::Value) -> Result<rust_decimal::Decimal, FeedError> {
    let raw = match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => return Err(FeedError::Parse(format!("unexpected price value {other}"))),
    };
    parse_lenient(&raw).map_err(|e| FeedError::Parse(e.to_string()))
}
