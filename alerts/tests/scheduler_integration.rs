use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use alerts::{
    condition::{
        memory::InMemoryConditionRepository,
        model::{Condition, ConditionKey, ConditionKind, Threshold},
        repository::ConditionRepository,
        repository_sqlx::SqlxConditionRepository,
    },
    db::schema,
    dispatcher::Dispatcher,
    evaluator::{AlertEvent, ema::EmaSmoothing},
    feed::{FeedError, PriceFeed, PriceSample, RateConverter},
    metrics::counters::Counters,
    scheduler::{Scheduler, Ticker},
};

// -----------------------
// DB + mocks
// -----------------------

async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    schema::migrate(&pool).await.expect("migrate");
    pool
}

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Per-asset behavior of the mock feed.
#[derive(Clone)]
enum Quote {
    Price(Decimal),
    Slow(Decimal, Duration),
    Down,
    Panic,
}

#[derive(Default)]
struct MockFeed {
    quotes: Mutex<HashMap<String, Quote>>,
}

impl MockFeed {
    fn set(&self, asset: &str, q: Quote) {
        self.quotes.lock().insert(asset.to_string(), q);
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    async fn current(&self, asset: &str) -> Result<PriceSample, FeedError> {
        let q = self.quotes.lock().get(asset).cloned();
        match q {
            Some(Quote::Price(price)) => Ok(PriceSample { price, ts: 0 }),
            Some(Quote::Slow(price, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(PriceSample { price, ts: 0 })
            }
            Some(Quote::Panic) => panic!("feed exploded for {asset}"),
            Some(Quote::Down) | None => Err(FeedError::InvalidResponse("down".into())),
        }
    }

    async fn price_at(&self, asset: &str, _ts: i64) -> Result<PriceSample, FeedError> {
        self.current(asset).await
    }
}

struct UsdOnly;

#[async_trait]
impl RateConverter for UsdOnly {
    async fn rate(&self, quote_currency: &str) -> Result<Decimal, FeedError> {
        match quote_currency {
            "USD" => Ok(Decimal::ONE),
            other => Err(FeedError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Delegates to an in-memory repository but refuses every state update.
struct ReadOnlyRepo(InMemoryConditionRepository);

#[async_trait]
impl ConditionRepository for ReadOnlyRepo {
    async fn load_active(&self, kind: ConditionKind) -> anyhow::Result<Vec<Condition>> {
        self.0.load_active(kind).await
    }
    async fn fetch_by_id(&self, id: &Uuid) -> anyhow::Result<Option<Condition>> {
        self.0.fetch_by_id(id).await
    }
    async fn list_for_owner(&self, owner: &str) -> anyhow::Result<Vec<Condition>> {
        self.0.list_for_owner(owner).await
    }
    async fn save(&self, c: &Condition) -> anyhow::Result<()> {
        self.0.save(c).await
    }
    async fn update_state(&self, _c: &Condition) -> anyhow::Result<bool> {
        Err(anyhow::anyhow!("database is locked"))
    }
    async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
        self.0.delete(id).await
    }
    async fn delete_by_key(&self, key: &ConditionKey) -> anyhow::Result<bool> {
        self.0.delete_by_key(key).await
    }
    async fn delete_for_owner(&self, owner: &str) -> anyhow::Result<u64> {
        self.0.delete_for_owner(owner).await
    }
}

/// Holds each VALUE batch load after reading its rows until the matching
/// gate opens, and reports every completed read on `reads`.
struct GatedRepo {
    inner: InMemoryConditionRepository,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    reads: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl ConditionRepository for GatedRepo {
    async fn load_active(&self, kind: ConditionKind) -> anyhow::Result<Vec<Condition>> {
        let rows = self.inner.load_active(kind).await?;
        if kind != ConditionKind::Value {
            return Ok(rows);
        }
        let gate = self.gates.lock().pop_front();
        let _ = self.reads.send(());
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(rows)
    }
    async fn fetch_by_id(&self, id: &Uuid) -> anyhow::Result<Option<Condition>> {
        self.inner.fetch_by_id(id).await
    }
    async fn list_for_owner(&self, owner: &str) -> anyhow::Result<Vec<Condition>> {
        self.inner.list_for_owner(owner).await
    }
    async fn save(&self, c: &Condition) -> anyhow::Result<()> {
        self.inner.save(c).await
    }
    async fn update_state(&self, c: &Condition) -> anyhow::Result<bool> {
        self.inner.update_state(c).await
    }
    async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
        self.inner.delete(id).await
    }
    async fn delete_by_key(&self, key: &ConditionKey) -> anyhow::Result<bool> {
        self.inner.delete_by_key(key).await
    }
    async fn delete_for_owner(&self, owner: &str) -> anyhow::Result<u64> {
        self.inner.delete_for_owner(owner).await
    }
}

/// Fires one tick per message; stops when the sender is dropped.
struct ChannelTicker(mpsc::Receiver<()>);

#[async_trait]
impl Ticker for ChannelTicker {
    async fn tick(&mut self) -> bool {
        self.0.recv().await.is_some()
    }
}

fn value(owner: &str, asset: &str) -> Condition {
    Condition::new(
        owner,
        asset,
        "USD",
        d("100"),
        0,
        Threshold::Value {
            upper: d("110"),
            lower: d("90"),
        },
    )
}

fn percent(owner: &str, asset: &str) -> Condition {
    Condition::new(
        owner,
        asset,
        "USD",
        d("100"),
        0,
        Threshold::Percent {
            up_percent: d("5"),
            down_percent: d("3"),
        },
    )
}

fn scheduler(
    repo: Arc<dyn ConditionRepository>,
    feed: Arc<MockFeed>,
) -> (Scheduler, mpsc::Receiver<AlertEvent>, Counters) {
    let counters = Counters::default();
    let (dispatcher, rx) = Dispatcher::channel(64, counters.clone());
    let s = Scheduler::new(
        repo,
        feed,
        Arc::new(UsdOnly),
        dispatcher,
        EmaSmoothing::default(),
        counters.clone(),
    );
    (s, rx, counters)
}

fn drain(rx: &mut mpsc::Receiver<AlertEvent>) -> Vec<AlertEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

// -----------------------
// Tests
// -----------------------

#[tokio::test]
async fn single_shot_conditions_fire_once_against_sqlite() {
    let pool = setup_db().await;
    let repo = Arc::new(SqlxConditionRepository::new(pool));
    let feed = Arc::new(MockFeed::default());
    let (s, mut rx, _) = scheduler(repo.clone(), feed.clone());

    let v = value("chat-1", "BTC");
    let p = percent("chat-1", "ETH");
    repo.save(&v).await.unwrap();
    repo.save(&p).await.unwrap();

    feed.set("BTC", Quote::Price(d("95")));
    feed.set("ETH", Quote::Price(d("102")));
    let report = s.tick().await;
    assert_eq!(report.loaded, 2);
    assert_eq!(report.unchanged, 2);
    assert!(drain(&mut rx).is_empty());

    feed.set("BTC", Quote::Price(d("89.99")));
    feed.set("ETH", Quote::Price(d("97")));
    let report = s.tick().await;
    assert_eq!(report.triggered, 2);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.message.contains("fell below the lower boundary")));
    assert!(events.iter().any(|e| e.message.contains("fell by 3.00%")));

    // Back inside the band: nothing left to evaluate.
    feed.set("BTC", Quote::Price(d("100")));
    feed.set("ETH", Quote::Price(d("100")));
    let report = s.tick().await;
    assert_eq!(report.loaded, 0);
    assert!(drain(&mut rx).is_empty());

    let stored = repo.fetch_by_id(&v.id).await.unwrap().unwrap();
    assert!(!stored.active);
    assert!(stored.trigger_ts.is_some());
}

#[tokio::test]
async fn panicking_unit_is_isolated() {
    let repo = Arc::new(InMemoryConditionRepository::new());
    let feed = Arc::new(MockFeed::default());
    let (s, mut rx, counters) = scheduler(repo.clone(), feed.clone());

    let boom = value("chat-1", "BOOM");
    let down = value("chat-1", "DOWN");
    let ok = value("chat-1", "BTC");
    for c in [&boom, &down, &ok] {
        repo.save(c).await.unwrap();
    }
    feed.set("BOOM", Quote::Panic);
    feed.set("DOWN", Quote::Down);
    feed.set("BTC", Quote::Price(d("150")));

    let report = s.tick().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.triggered, 1);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].condition_id, ok.id);

    // The panicked unit released its guard; the next tick evaluates it again.
    assert!(s.in_flight().is_empty());
    feed.set("BOOM", Quote::Price(d("100")));
    let report = s.tick().await;
    assert_eq!(report.overlapped, 0);
    assert_eq!(report.loaded, 2);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(counters.snapshot().failed, 1);
}

#[tokio::test]
async fn failed_save_sends_no_event() {
    let inner = InMemoryConditionRepository::new();
    let c = value("chat-1", "BTC");
    inner.save(&c).await.unwrap();

    let repo = Arc::new(ReadOnlyRepo(inner));
    let feed = Arc::new(MockFeed::default());
    feed.set("BTC", Quote::Price(d("200")));
    let (s, mut rx, _) = scheduler(repo.clone(), feed);

    let report = s.tick().await;
    assert_eq!(report.failed, 1);
    assert!(drain(&mut rx).is_empty());

    // Still active, so the next tick retries.
    assert!(repo.fetch_by_id(&c.id).await.unwrap().unwrap().active);
}

#[tokio::test(start_paused = true)]
async fn overlapping_tick_skips_condition_still_in_flight() {
    let repo = Arc::new(InMemoryConditionRepository::new());
    let feed = Arc::new(MockFeed::default());
    let (s, mut rx, counters) = scheduler(repo.clone(), feed.clone());

    let slow = value("chat-1", "SLOW");
    let fast = value("chat-1", "BTC");
    repo.save(&slow).await.unwrap();
    repo.save(&fast).await.unwrap();
    feed.set("SLOW", Quote::Slow(d("120"), Duration::from_secs(600)));
    feed.set("BTC", Quote::Price(d("100")));

    let first = {
        let s = s.clone();
        tokio::spawn(async move { s.tick().await })
    };
    // Let the first tick start its units.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(s.in_flight().len(), 1);

    let second = s.tick().await;
    assert_eq!(second.overlapped, 1);
    assert_eq!(second.unchanged, 1);

    let first = first.await.unwrap();
    assert_eq!(first.triggered, 1);

    // Exactly one event despite two ticks seeing the breach window.
    assert_eq!(drain(&mut rx).len(), 1);
    assert_eq!(counters.snapshot().overlapped, 1);
}

#[tokio::test]
async fn run_loop_ticks_until_ticker_stops() {
    let repo = Arc::new(InMemoryConditionRepository::new());
    let feed = Arc::new(MockFeed::default());
    let (s, mut rx, counters) = scheduler(repo.clone(), feed.clone());

    let ema = Condition::new(
        "chat-1",
        "BTC",
        "USD",
        d("100"),
        0,
        Threshold::Ema {
            ema_value: d("100"),
            is_above: Some(false),
        },
    );
    repo.save(&ema).await.unwrap();
    feed.set("BTC", Quote::Price(d("300")));

    let (tx, ticks) = mpsc::channel(4);
    tx.send(()).await.unwrap();
    drop(tx);

    s.run(ChannelTicker(ticks)).await;

    let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within timeout")
        .expect("dispatcher open");
    assert_eq!(ev.condition_id, ema.id);
    assert!(ev.message.contains("upward trend"));
    assert_eq!(counters.snapshot().ticks, 1);
}

#[tokio::test]
async fn tick_with_stale_load_does_not_fire_retired_condition_again() {
    let inner = InMemoryConditionRepository::new();
    let c = value("chat-1", "BTC");
    inner.save(&c).await.unwrap();

    let (open_first, first_gate) = oneshot::channel();
    let (open_second, second_gate) = oneshot::channel();
    let (reads_tx, mut reads) = mpsc::unbounded_channel();
    let repo = Arc::new(GatedRepo {
        inner,
        gates: Mutex::new(VecDeque::from([first_gate, second_gate])),
        reads: reads_tx,
    });

    let feed = Arc::new(MockFeed::default());
    feed.set("BTC", Quote::Price(d("150")));
    let (s, mut rx, _) = scheduler(repo.clone(), feed);

    // Both ticks read the still-active row before either evaluates it.
    let first = {
        let s = s.clone();
        tokio::spawn(async move { s.tick().await })
    };
    reads.recv().await.unwrap();
    let second = {
        let s = s.clone();
        tokio::spawn(async move { s.tick().await })
    };
    reads.recv().await.unwrap();

    open_first.send(()).unwrap();
    let first = first.await.unwrap();
    assert_eq!(first.triggered, 1);
    let fired_at = repo.fetch_by_id(&c.id).await.unwrap().unwrap().trigger_ts;
    assert!(fired_at.is_some());

    // The first unit has released its guard; the second tick gets it.
    open_second.send(()).unwrap();
    let second = second.await.unwrap();
    assert_eq!(second.loaded, 1);
    assert_eq!(second.overlapped, 0);
    assert_eq!(second.triggered, 0);
    assert_eq!(second.stale, 1);

    assert_eq!(drain(&mut rx).len(), 1);
    let stored = repo.fetch_by_id(&c.id).await.unwrap().unwrap();
    assert!(!stored.active);
    assert_eq!(stored.trigger_ts, fired_at);
}
