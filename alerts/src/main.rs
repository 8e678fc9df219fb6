use std::sync::Arc;
use std::time::Duration;

use alerts::{
    condition::repository_sqlx::SqlxConditionRepository,
    config::AppConfig,
    db::Db,
    dispatcher::{Dispatcher, drain},
    feed::{BingxClient, PriceFeed, RateConverter, RatesClient},
    metrics::counters::Counters,
    notifier::{LogNotifier, Notifier, TelegramNotifier},
    scheduler::{IntervalTicker, Scheduler},
};
use anyhow::Context;
use common::init_tracing;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Connects the database and makes sure the schema exists.
async fn init_repository(cfg: &AppConfig) -> anyhow::Result<Arc<SqlxConditionRepository>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await.context("schema migration")?;

    Ok(Arc::new(SqlxConditionRepository::new(db.pool.as_ref().clone())))
}

fn build_notifier(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &cfg.telegram_bot_token {
        Some(token) => {
            let n = TelegramNotifier::new(token, cfg.http_timeout)
                .context("build telegram client")?;
            Ok(Arc::new(n))
        }
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set; alerts are only logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging comes up before config so config warnings are not lost.
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing("alertd", is_production);

    tracing::info!("Starting alert engine...");

    let cfg = AppConfig::from_env();

    let repo = init_repository(&cfg).await?;

    let feed: Arc<dyn PriceFeed> = Arc::new(
        BingxClient::new(
            cfg.feed_base_url.clone(),
            cfg.feed_api_key.clone(),
            cfg.http_timeout,
        )
        .context("build price feed client")?,
    );
    let rates: Arc<dyn RateConverter> = Arc::new(
        RatesClient::new(cfg.rates_base_url.clone(), cfg.http_timeout)
            .context("build rates client")?,
    );

    let counters = Counters::default();
    let (dispatcher, dispatch_worker) = Dispatcher::start(
        build_notifier(&cfg)?,
        cfg.dispatch_queue_capacity,
        counters.clone(),
    );

    let scheduler = Scheduler::new(
        repo,
        feed,
        rates,
        dispatcher,
        cfg.ema_smoothing,
        counters.clone(),
    );

    tracing::info!(
        tick_secs = cfg.tick_interval.as_secs(),
        alpha = %cfg.ema_smoothing,
        "scheduler configured"
    );

    let scheduler_task = tokio::spawn(scheduler.run(IntervalTicker::new(cfg.tick_interval)));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Stop ticking, then let the worker drain what is queued. It exits once
    // the last unit holding a dispatcher handle has finished.
    scheduler_task.abort();
    let _ = scheduler_task.await;
    if drain(dispatch_worker, SHUTDOWN_GRACE).await {
        tracing::info!("dispatch queue drained");
    } else {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "dispatch queue not drained in time; remaining events dropped"
        );
    }

    let snap = counters.snapshot();
    tracing::info!(?snap, "final counters");

    Ok(())
}
