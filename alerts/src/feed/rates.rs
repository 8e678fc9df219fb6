use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use super::RateConverter;
use super::errors::FeedError;
use crate::numeric::{RATE_DP, parse_lenient, round_half_up};

/// Currencies priced 1:1 against the feed's native USDT.
const NATIVE: [&str; 2] = ["USD", "USDT"];

/// USD based currency rates served as `GET <base>/usd.json`:
/// `{"date": "...", "usd": {"eur": 0.92, "rub": 91.3, ...}}`.
#[derive(Clone)]
pub struct RatesClient {
    http: Client,
    url: String,
}

impl RatesClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RateConverter for RatesClient {
    #[instrument(skip(self), target = "feed", level = "debug")]
    async fn rate(&self, quote_currency: &str) -> Result<Decimal, FeedError> {
        let code = quote_currency.trim().to_ascii_uppercase();
        if NATIVE.contains(&code.as_str()) {
            return Ok(Decimal::ONE);
        }

        let body = self
            .http
            .get(format!("{}/usd.json", self.url))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let rate = parse_usd_rate(&body, &code)?;
        debug!(currency = %code, %rate, "currency rate fetched");
        Ok(rate)
    }
}

/// Extracts the multiplier for `code` and rounds it to 4 digits.
pub fn parse_usd_rate(body: &str, code: &str) -> Result<Decimal, FeedError> {
    let root: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

    let raw = root
        .get("usd")
        .and_then(|usd| usd.get(code.to_ascii_lowercase()))
        .ok_or_else(|| FeedError::UnknownCurrency(code.to_string()))?;

    let text = match raw {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => return Err(FeedError::Parse(format!("unexpected rate value {other}"))),
    };

    let rate = parse_lenient(&text).map_err(|e| FeedError::Parse(e.to_string()))?;
    if rate <= Decimal::ZERO {
        return Err(FeedError::InvalidResponse(format!(
            "non-positive rate {rate} for {code}"
        )));
    }
    Ok(round_half_up(rate, RATE_DP))
}
