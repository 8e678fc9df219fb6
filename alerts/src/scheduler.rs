//! Periodic evaluation of every condition.
//!
//! Responsibilities:
//! - On each tick, load active VALUE/PERCENT conditions and all EMA conditions.
//! - Run one independent evaluation unit per condition, concurrently.
//! - Persist the state change a unit computed, then hand its event to the
//!   dispatcher.
//!
//! Failure isolation:
//! - A unit's error or panic is logged at the unit boundary and never touches
//!   sibling units or later ticks.
//! - Ticks do not wait for each other. A condition whose unit from an earlier
//!   tick is still running is skipped for the new tick, so at most one unit
//!   per condition runs at a time in this process.
//! - A unit re-reads its condition once it holds the guard. The batch load
//!   may predate an earlier unit's write, and acting on that copy would fire
//!   a retired condition again or roll an EMA back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::{child_span, root_span};
use common::{TraceId, warn_if_slow};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{Instrument, debug, error, field, info, instrument, warn};
use uuid::Uuid;

use crate::condition::model::{Condition, ConditionKind};
use crate::condition::repository::ConditionRepository;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::evaluator::ema::EmaSmoothing;
use crate::evaluator::{self, PriceObservation};
use crate::feed::{PriceFeed, RateConverter};
use crate::metrics::counters::Counters;
use crate::numeric::convert;
use crate::time::now_secs;

const SLOW_DB: Duration = Duration::from_millis(100);
const SLOW_FEED: Duration = Duration::from_secs(2);

/// Source of tick instants.
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick. `false` stops the scheduler loop.
    async fn tick(&mut self) -> bool;
}

/// Fixed-period ticker. The first tick fires immediately.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // A late tick is not made up for; the period stays fixed.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ids of conditions with a running evaluation unit.
#[derive(Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlight {
    /// `None` when a unit for `id` is already running.
    pub fn try_acquire(&self, id: Uuid) -> Option<InFlightGuard> {
        if self.ids.lock().insert(id) {
            Some(InFlightGuard {
                ids: self.ids.clone(),
                id,
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

/// Releases the condition when the unit ends, including on panic.
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

/// What a single evaluation unit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Nothing to persist.
    Unchanged,
    /// State persisted, no event (EMA drift, first EMA observation).
    Updated,
    /// State persisted and event handed to the dispatcher.
    Triggered,
    /// The condition was deleted while its unit ran; nothing dispatched.
    Vanished,
    /// The loaded copy was out of date and the stored condition no longer
    /// needs evaluation.
    Stale,
}

/// Summary of one tick, once all its units have finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub loaded: usize,
    pub overlapped: usize,
    pub unchanged: usize,
    pub updated: usize,
    pub triggered: usize,
    pub vanished: usize,
    pub stale: usize,
    /// Transient feed or conversion errors.
    pub skipped: usize,
    /// Persistence errors and panics.
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, res: &Result<UnitOutcome, EngineError>) {
        match res {
            Ok(UnitOutcome::Unchanged) => self.unchanged += 1,
            Ok(UnitOutcome::Updated) => self.updated += 1,
            Ok(UnitOutcome::Triggered) => self.triggered += 1,
            Ok(UnitOutcome::Vanished) => self.vanished += 1,
            Ok(UnitOutcome::Stale) => self.stale += 1,
            Err(e) if e.is_transient() => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Everything an evaluation unit needs, shared by all units of all ticks.
struct Deps {
    repo: Arc<dyn ConditionRepository>,
    feed: Arc<dyn PriceFeed>,
    rates: Arc<dyn RateConverter>,
    dispatcher: Dispatcher,
    alpha: EmaSmoothing,
    counters: Counters,
}

#[derive(Clone)]
pub struct Scheduler {
    deps: Arc<Deps>,
    in_flight: InFlight,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn ConditionRepository>,
        feed: Arc<dyn PriceFeed>,
        rates: Arc<dyn RateConverter>,
        dispatcher: Dispatcher,
        alpha: EmaSmoothing,
        counters: Counters,
    ) -> Self {
        Self {
            deps: Arc::new(Deps {
                repo,
                feed,
                rates,
                dispatcher,
                alpha,
                counters,
            }),
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Drives ticks until `ticker` stops. Each tick runs as its own task so a
    /// slow tick never delays the next one.
    pub async fn run<T: Ticker>(self, mut ticker: T) {
        info!(target: "scheduler", alpha = %self.deps.alpha, "scheduler started");

        while ticker.tick().await {
            let this = self.clone();
            let trace_id = TraceId::new();
            tokio::spawn(
                async move {
                    let report = this.tick().await;
                    debug!(target: "scheduler", ?report, "tick finished");
                }
                .instrument(root_span("tick", &trace_id)),
            );
        }

        info!(target: "scheduler", "scheduler stopped");
    }

    /// Runs one tick and waits for all of its units.
    #[instrument(
        skip(self),
        target = "scheduler",
        fields(loaded = field::Empty)
    )]
    pub async fn tick(&self) -> TickReport {
        Counters::incr(&self.deps.counters.ticks);

        let conditions = self.load_all().await;
        tracing::Span::current().record("loaded", conditions.len());

        let mut report = TickReport {
            loaded: conditions.len(),
            ..TickReport::default()
        };

        let mut units = JoinSet::new();
        for condition in conditions {
            let Some(guard) = self.in_flight.try_acquire(condition.id) else {
                report.overlapped += 1;
                Counters::incr(&self.deps.counters.overlapped);
                debug!(condition_id = %condition.id, "previous unit still running; skipped");
                continue;
            };

            let deps = self.deps.clone();
            let span = child_span("evaluate");
            span.record("condition_id", field::display(condition.id));
            span.record("owner", field::display(&condition.owner));

            units.spawn(
                async move {
                    let _guard = guard;
                    let res = run_unit(&deps, condition.id).await;
                    log_unit(&deps.counters, &res);
                    res
                }
                .instrument(span),
            );
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(res) => report.record(&res),
                Err(e) => {
                    // Panic inside a unit; its guard was released on unwind.
                    report.failed += 1;
                    Counters::incr(&self.deps.counters.failed);
                    error!(error = %e, "evaluation unit aborted");
                }
            }
        }

        info!(
            loaded = report.loaded,
            triggered = report.triggered,
            skipped = report.skipped,
            failed = report.failed,
            overlapped = report.overlapped,
            "tick complete"
        );
        report
    }

    /// Loads every kind; a failed load only loses that kind for this tick.
    async fn load_all(&self) -> Vec<Condition> {
        let loads = ConditionKind::ALL.map(|kind| async move {
            let res = warn_if_slow("db_load_active", SLOW_DB, self.deps.repo.load_active(kind)).await;
            (kind, res)
        });

        let mut out = Vec::new();
        for (kind, res) in join_all(loads).await {
            match res {
                Ok(mut batch) => out.append(&mut batch),
                Err(e) => {
                    let chain = format!("{e:#}");
                    error!(%kind, error = %chain, "failed to load conditions");
                }
            }
        }
        out
    }
}

/// One condition, one tick: re-read, fetch, convert, evaluate, persist,
/// dispatch. Must run under the condition's [`InFlightGuard`].
async fn run_unit(deps: &Deps, id: Uuid) -> Result<UnitOutcome, EngineError> {
    let fresh = warn_if_slow("db_fetch_by_id", SLOW_DB, deps.repo.fetch_by_id(&id))
        .await
        .map_err(EngineError::persistence)?;

    let condition = match fresh {
        Some(c) if c.needs_evaluation() => c,
        Some(_) => return Ok(UnitOutcome::Stale),
        None => return Ok(UnitOutcome::Vanished),
    };

    Counters::incr(&deps.counters.evaluated);

    let asset = condition.asset.as_str();
    let quote = condition.quote_currency.as_str();

    let (sample, rate) = warn_if_slow("feed_snapshot", SLOW_FEED, async {
        tokio::try_join!(
            async {
                deps.feed
                    .current(asset)
                    .await
                    .map_err(|e| EngineError::feed(asset, e))
            },
            async {
                deps.rates
                    .rate(quote)
                    .await
                    .map_err(|e| EngineError::conversion(quote, e))
            },
        )
    })
    .await?;

    let obs = PriceObservation {
        price: convert(sample.price, rate),
        ts: now_secs(),
    };

    let evaluation = evaluator::evaluate(&condition, &obs, deps.alpha);

    let Some(updated) = evaluation.updated else {
        return Ok(UnitOutcome::Unchanged);
    };

    let stored = warn_if_slow("db_update_state", SLOW_DB, deps.repo.update_state(&updated))
        .await
        .map_err(EngineError::persistence)?;

    if !stored {
        return Ok(UnitOutcome::Vanished);
    }

    match evaluation.event {
        Some(event) => {
            // Dispatch failures are counted and logged by the dispatcher.
            let _ = deps.dispatcher.send(event);
            Ok(UnitOutcome::Triggered)
        }
        None => Ok(UnitOutcome::Updated),
    }
}

fn log_unit(counters: &Counters, res: &Result<UnitOutcome, EngineError>) {
    match res {
        Ok(UnitOutcome::Triggered) => {
            Counters::incr(&counters.triggered);
            info!("condition triggered");
        }
        Ok(UnitOutcome::Vanished) => debug!("condition deleted during evaluation"),
        Ok(UnitOutcome::Stale) => debug!("condition already retired by an earlier unit"),
        Ok(outcome) => debug!(?outcome, "condition evaluated"),
        Err(e) if e.is_transient() => {
            Counters::incr(&counters.skipped);
            warn!(error = %e, "evaluation skipped for this tick");
        }
        Err(e) => {
            Counters::incr(&counters.failed);
            error!(error = %e, "evaluation failed");
        }
    }
}
