//! Initial EMA for a new EMA condition.
//!
//! The seed is the simple moving average of one historical sample per day
//! over the last `period` days, ending at creation time. A sample that still
//! fails after its retries counts as zero, which pulls the average down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::config::{AppConfig, default_seed_retry_delays};
use crate::feed::PriceFeed;
use crate::numeric::{convert, round_price};
use crate::time::SECS_PER_DAY;

#[derive(Clone, Debug)]
pub struct SeedPolicy {
    /// Number of daily samples.
    pub period: usize,
    /// Delay before each retry; `len()` is the retry count.
    pub retry_delays: Vec<Duration>,
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            period: 20,
            retry_delays: default_seed_retry_delays(),
        }
    }
}

impl From<&AppConfig> for SeedPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            period: cfg.ema_period,
            retry_delays: cfg.seed_retry_delays.clone(),
        }
    }
}

/// Outcome of seeding, in the condition's quote currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seed {
    pub ema_value: Decimal,
    pub is_above: bool,
    /// Samples that fell back to zero.
    pub fallbacks: usize,
}

pub struct EmaSeeder {
    feed: Arc<dyn PriceFeed>,
    policy: SeedPolicy,
}

impl EmaSeeder {
    pub fn new(feed: Arc<dyn PriceFeed>, policy: SeedPolicy) -> Self {
        Self {
            feed,
            policy: SeedPolicy {
                period: policy.period.max(1),
                ..policy
            },
        }
    }

    /// Timestamps of the samples: `start_ts`, one day before, ... (`period` of them).
    pub fn sample_times(&self, start_ts: i64) -> Vec<i64> {
        (0..self.policy.period as i64)
            .map(|i| start_ts - i * SECS_PER_DAY)
            .collect()
    }

    /// Fetches all samples concurrently and derives the seed.
    ///
    /// `current_price` is already in quote currency; `rate` converts the
    /// feed-native samples into it. There is no overall timeout: this takes as
    /// long as the slowest sample including its retries.
    #[instrument(skip(self), target = "seeder", fields(period = self.policy.period))]
    pub async fn seed(
        &self,
        asset: &str,
        start_ts: i64,
        current_price: Decimal,
        rate: Decimal,
    ) -> Seed {
        let fetches = self
            .sample_times(start_ts)
            .into_iter()
            .map(|ts| self.sample(asset, ts));

        let samples: Vec<Option<Decimal>> = join_all(fetches).await;

        let fallbacks = samples.iter().filter(|s| s.is_none()).count();
        let values: Vec<Decimal> = samples.into_iter().map(|s| s.unwrap_or(Decimal::ZERO)).collect();

        let sma = simple_average(&values);
        let ema_value = convert(sma, rate);
        let is_above = current_price > ema_value;

        if fallbacks > 0 {
            warn!(
                fallbacks,
                period = values.len(),
                "seed average includes zero samples"
            );
        }

        info!(%ema_value, %current_price, is_above, "ema seeded");

        Seed {
            ema_value,
            is_above,
            fallbacks,
        }
    }

    /// One historical price with retries. `None` once every attempt failed.
    async fn sample(&self, asset: &str, ts: i64) -> Option<Decimal> {
        let res = retry_with_delays(&self.policy.retry_delays, "historical_price", || {
            self.feed.price_at(asset, ts)
        })
        .await;

        match res {
            Ok(s) => {
                debug!(ts, price = %s.price, "historical sample fetched");
                Some(s.price)
            }
            Err(e) => {
                warn!(ts, error = %e, "historical sample failed after retries; using zero");
                None
            }
        }
    }
}

/// Arithmetic mean rounded half-up to 2 digits. Zero for an empty slice.
pub fn simple_average(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().copied().sum();
    round_price(sum / Decimal::from(values.len() as u64))
}

/// Runs `op` once, then once more after each delay in `delays` until it
/// succeeds. Returns the last error when all attempts fail.
pub async fn retry_with_delays<F, Fut, T, E>(
    delays: &[Duration],
    label: &'static str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let Some(delay) = delays.get(attempt) else {
                    return Err(e);
                };
                attempt += 1;
                warn!(
                    label,
                    attempt,
                    max_retries = delays.len(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after error"
                );
                tokio::time::sleep(*delay).await;
            }
        }
    }
}
