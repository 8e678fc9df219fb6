use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::evaluator::ema::EmaSmoothing;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    // =========================
    // Scheduler configuration
    // =========================
    /// Wall-clock period between two evaluation ticks.
    ///
    /// Ticks never wait for each other: a slow tick does not push back
    /// the next one.
    pub tick_interval: Duration,

    // =========================
    // EMA configuration
    // =========================
    /// Number of daily samples averaged into the initial EMA.
    pub ema_period: usize,

    /// Weight of the newest price in every EMA update.
    ///
    /// `EMA_SMOOTHING=period` selects `2 / (period + 1)`.
    pub ema_smoothing: EmaSmoothing,

    /// Delays between attempts of one historical fetch during seeding.
    /// Its length is the number of retries after the first attempt.
    pub seed_retry_delays: Vec<Duration>,

    // =========================
    // External collaborators
    // =========================
    /// Base URL of the spot price feed.
    pub feed_base_url: String,

    /// Optional API key sent with every feed request.
    pub feed_api_key: Option<String>,

    /// Base URL of the currency rates source (serves `/usd.json`).
    pub rates_base_url: String,

    /// Per-request timeout for all outbound HTTP calls.
    pub http_timeout: Duration,

    /// Bot token for chat delivery; events are only logged when absent.
    pub telegram_bot_token: Option<String>,

    /// Capacity of the queue between evaluation units and the notifier.
    ///
    /// When it is full, new events are dropped and logged rather than
    /// blocking the evaluation unit.
    pub dispatch_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://alerts_dev.db".to_string());

        let ema_period = env_parse("EMA_PERIOD", 20usize).max(1);

        let ema_smoothing = match std::env::var("EMA_SMOOTHING") {
            Ok(v) if v.trim().eq_ignore_ascii_case("period") => EmaSmoothing::from_period(ema_period),
            Ok(v) => match Decimal::from_str(v.trim()).ok().and_then(EmaSmoothing::new) {
                Some(alpha) => alpha,
                None => {
                    tracing::warn!(value = %v, "invalid EMA_SMOOTHING; using default");
                    EmaSmoothing::default()
                }
            },
            Err(_) => EmaSmoothing::default(),
        };

        Self {
            database_url,

            tick_interval: Duration::from_secs(env_parse("TICK_INTERVAL_SECS", 300u64).max(1)),

            ema_period,
            ema_smoothing,
            seed_retry_delays: parse_delays(
                &std::env::var("SEED_RETRY_DELAYS_MS").unwrap_or_default(),
            ),

            feed_base_url: std::env::var("FEED_BASE_URL")
                .unwrap_or_else(|_| "https://open-api.bingx.com".to_string()),
            feed_api_key: non_empty_var("FEED_API_KEY"),
            rates_base_url: std::env::var("RATES_BASE_URL").unwrap_or_else(|_| {
                "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies"
                    .to_string()
            }),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 5u64)),

            telegram_bot_token: non_empty_var("TELEGRAM_BOT_TOKEN"),
            dispatch_queue_capacity: env_parse("DISPATCH_QUEUE_CAPACITY", 256usize).max(1),
        }
    }
}

/// Default retry schedule for historical fetches: 10 ms, then 20 ms.
pub fn default_seed_retry_delays() -> Vec<Duration> {
    vec![Duration::from_millis(10), Duration::from_millis(20)]
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "invalid number; using default");
            default
        }),
        Err(_) => default,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parses a comma separated list of millisecond delays.
/// An empty or fully malformed list yields the default schedule.
fn parse_delays(raw: &str) -> Vec<Duration> {
    let delays: Vec<Duration> = raw
        .split(',')
        .filter_map(|p| p.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .collect();

    if delays.is_empty() {
        default_seed_retry_delays()
    } else {
        delays
    }
}
