//! Creation and removal of conditions on behalf of an owner.
//!
//! Every creation validates its input first, then snapshots the current
//! price converted into the quote currency, and finally stores the condition,
//! replacing any earlier one with the same (owner, asset, kind) key.

use std::sync::Arc;
use std::time::Duration;

use common::warn_if_slow;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::condition::model::{Condition, ConditionKey, ConditionKind, Threshold, normalize_code};
use crate::condition::repository::ConditionRepository;
use crate::error::{EngineError, ValidationError};
use crate::evaluator::messages;
use crate::feed::{PriceFeed, RateConverter};
use crate::numeric::convert;
use crate::seeder::EmaSeeder;
use crate::time::now_secs;

const SLOW_DB: Duration = Duration::from_millis(100);

/// A stored condition and the confirmation text for its owner.
#[derive(Clone, Debug)]
pub struct Created {
    pub condition: Condition,
    pub message: String,
}

/// Current price of an asset in a quote currency.
#[derive(Clone, Copy, Debug)]
struct Snapshot {
    price: Decimal,
    rate: Decimal,
    /// Feed time of the price, Unix seconds.
    ts: i64,
}

pub struct ConditionService {
    repo: Arc<dyn ConditionRepository>,
    feed: Arc<dyn PriceFeed>,
    rates: Arc<dyn RateConverter>,
    seeder: EmaSeeder,
}

impl ConditionService {
    pub fn new(
        repo: Arc<dyn ConditionRepository>,
        feed: Arc<dyn PriceFeed>,
        rates: Arc<dyn RateConverter>,
        seeder: EmaSeeder,
    ) -> Self {
        Self {
            repo,
            feed,
            rates,
            seeder,
        }
    }

    #[instrument(skip(self), target = "store")]
    pub async fn create_value(
        &self,
        owner: &str,
        asset: &str,
        quote_currency: &str,
        upper: Decimal,
        lower: Decimal,
    ) -> Result<Created, EngineError> {
        let (owner, asset, quote) = identity(owner, asset, quote_currency)?;
        positive(ConditionKind::Value, "upper", upper)?;
        positive(ConditionKind::Value, "lower", lower)?;
        if lower >= upper {
            return Err(ValidationError::BoundsOutOfOrder.into());
        }

        let snap = self.snapshot(&asset, &quote).await?;
        let condition = Condition::new(
            owner,
            asset,
            quote,
            snap.price,
            now_secs(),
            Threshold::Value { upper, lower },
        );
        self.store(condition).await
    }

    #[instrument(skip(self), target = "store")]
    pub async fn create_percent(
        &self,
        owner: &str,
        asset: &str,
        quote_currency: &str,
        up_percent: Decimal,
        down_percent: Decimal,
    ) -> Result<Created, EngineError> {
        let (owner, asset, quote) = identity(owner, asset, quote_currency)?;
        positive(ConditionKind::Percent, "up_percent", up_percent)?;
        positive(ConditionKind::Percent, "down_percent", down_percent)?;

        let snap = self.snapshot(&asset, &quote).await?;
        if snap.price <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveStartPrice.into());
        }

        let condition = Condition::new(
            owner,
            asset,
            quote,
            snap.price,
            now_secs(),
            Threshold::Percent {
                up_percent,
                down_percent,
            },
        );
        self.store(condition).await
    }

    /// Seeds the EMA from daily history before storing. Seeding never fails;
    /// missing samples count as zero. Sample days are counted back from the
    /// feed time of the current price.
    #[instrument(skip(self), target = "store")]
    pub async fn create_ema(
        &self,
        owner: &str,
        asset: &str,
        quote_currency: &str,
    ) -> Result<Created, EngineError> {
        let (owner, asset, quote) = identity(owner, asset, quote_currency)?;

        let snap = self.snapshot(&asset, &quote).await?;
        let start_ts = snap.ts;
        let seed = self
            .seeder
            .seed(&asset, start_ts, snap.price, snap.rate)
            .await;

        let condition = Condition::new(
            owner,
            asset,
            quote,
            snap.price,
            start_ts,
            Threshold::Ema {
                ema_value: seed.ema_value,
                is_above: Some(seed.is_above),
            },
        );
        self.store(condition).await
    }

    /// Removes the owner's condition of `kind` on `asset`, if any.
    #[instrument(skip(self), target = "store")]
    pub async fn delete(
        &self,
        owner: &str,
        asset: &str,
        kind: ConditionKind,
    ) -> Result<bool, EngineError> {
        let key = ConditionKey {
            owner: owner.trim().to_string(),
            asset: normalize_code(asset),
            kind,
        };
        let removed = warn_if_slow("db_delete_by_key", SLOW_DB, self.repo.delete_by_key(&key))
            .await
            .map_err(EngineError::persistence)?;

        info!(removed, "delete by key");
        Ok(removed)
    }

    #[instrument(skip(self), target = "store", fields(condition_id = %id))]
    pub async fn delete_by_id(&self, id: &Uuid) -> Result<bool, EngineError> {
        warn_if_slow("db_delete", SLOW_DB, self.repo.delete(id))
            .await
            .map_err(EngineError::persistence)
    }

    /// Number of conditions removed.
    #[instrument(skip(self), target = "store")]
    pub async fn delete_all(&self, owner: &str) -> Result<u64, EngineError> {
        let n = warn_if_slow(
            "db_delete_for_owner",
            SLOW_DB,
            self.repo.delete_for_owner(owner.trim()),
        )
        .await
        .map_err(EngineError::persistence)?;

        info!(removed = n, "all conditions of owner deleted");
        Ok(n)
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Condition>, EngineError> {
        self.repo
            .list_for_owner(owner.trim())
            .await
            .map_err(EngineError::persistence)
    }

    /// The owner's conditions as display lines, ordered by asset then kind.
    pub async fn summaries(&self, owner: &str) -> Result<Vec<String>, EngineError> {
        let conditions = self.list(owner).await?;
        Ok(conditions.iter().map(messages::summary_line).collect())
    }

    async fn snapshot(&self, asset: &str, quote: &str) -> Result<Snapshot, EngineError> {
        let (sample, rate) = tokio::try_join!(
            async {
                self.feed
                    .current(asset)
                    .await
                    .map_err(|e| EngineError::feed(asset, e))
            },
            async {
                self.rates
                    .rate(quote)
                    .await
                    .map_err(|e| EngineError::conversion(quote, e))
            },
        )?;

        Ok(Snapshot {
            price: convert(sample.price, rate),
            rate,
            ts: sample.ts,
        })
    }

    async fn store(&self, condition: Condition) -> Result<Created, EngineError> {
        warn_if_slow("db_save", SLOW_DB, self.repo.save(&condition))
            .await
            .map_err(EngineError::persistence)?;

        info!(
            condition_id = %condition.id,
            kind = %condition.kind(),
            asset = %condition.asset,
            start_price = %condition.start_price,
            "condition stored"
        );

        let message = messages::created(&condition);
        Ok(Created { condition, message })
    }
}

fn identity(
    owner: &str,
    asset: &str,
    quote_currency: &str,
) -> Result<(String, String, String), ValidationError> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(ValidationError::EmptyOwner);
    }
    let asset = normalize_code(asset);
    if asset.is_empty() {
        return Err(ValidationError::EmptyAsset);
    }
    let quote = normalize_code(quote_currency);
    if quote.is_empty() {
        return Err(ValidationError::EmptyQuoteCurrency);
    }
    Ok((owner.to_string(), asset, quote))
}

fn positive(kind: ConditionKind, field: &'static str, v: Decimal) -> Result<(), ValidationError> {
    if v <= Decimal::ZERO {
        return Err(ValidationError::NonPositive { kind, field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::condition::memory::InMemoryConditionRepository;
    use crate::feed::test_support::{FixedFeed, FixedRates};
    use crate::seeder::SeedPolicy;
    use crate::time::SECS_PER_DAY;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn service(price: &str) -> (Arc<InMemoryConditionRepository>, ConditionService) {
        let repo = Arc::new(InMemoryConditionRepository::new());
        let feed = Arc::new(FixedFeed::with("BTC", d(price)));
        let rates = Arc::new(FixedRates::with("EUR", d("0.5")));
        let seeder = EmaSeeder::new(feed.clone(), SeedPolicy::default());
        (repo.clone(), ConditionService::new(repo, feed, rates, seeder))
    }

    #[tokio::test]
    async fn value_condition_snapshots_converted_price() {
        let (repo, svc) = service("100.01");
        let created = svc
            .create_value("chat-1", "btc", "eur", d("60"), d("40"))
            .await
            .unwrap();

        assert_eq!(created.condition.start_price, d("50.01"));
        assert_eq!(created.condition.asset, "BTC");
        assert_eq!(created.condition.quote_currency, "EUR");
        assert!(created.message.contains("Upper boundary: 60.00 EUR"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn invalid_bounds_are_rejected_before_storage() {
        let (repo, svc) = service("100");

        let err = svc
            .create_value("chat-1", "BTC", "USD", d("90"), d("110"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::BoundsOutOfOrder)
        ));

        let err = svc
            .create_percent("chat-1", "BTC", "USD", d("0"), d("3"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::NonPositive {
                field: "up_percent",
                ..
            })
        ));

        let err = svc
            .create_ema(" ", "BTC", "USD")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::EmptyOwner)));

        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn unknown_currency_is_a_conversion_error() {
        let (repo, svc) = service("100");
        let err = svc
            .create_value("chat-1", "BTC", "JPY", d("110"), d("90"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConversionUnavailable { .. }));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn unknown_asset_is_a_feed_error() {
        let (_, svc) = service("100");
        let err = svc
            .create_percent("chat-1", "DOGE", "USD", d("5"), d("3"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FeedUnavailable { asset, .. } if asset == "DOGE"));
    }

    #[tokio::test]
    async fn recreating_replaces_the_previous_condition() {
        let (repo, svc) = service("100");
        let first = svc
            .create_percent("chat-1", "BTC", "USD", d("5"), d("3"))
            .await
            .unwrap();
        let second = svc
            .create_percent("chat-1", "BTC", "USD", d("10"), d("10"))
            .await
            .unwrap();

        assert_eq!(repo.len(), 1);
        assert!(repo.get(&first.condition.id).is_none());
        assert!(repo.get(&second.condition.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ema_condition_is_seeded_from_history() {
        let (repo, svc) = service("100");
        let created = svc.create_ema("chat-1", "BTC", "USD").await.unwrap();

        assert_eq!(
            created.condition.threshold,
            Threshold::Ema {
                ema_value: d("100"),
                is_above: Some(false),
            }
        );
        assert!(created.message.contains("Initial EMA: 100.00 USD"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ema_samples_count_back_from_feed_time() {
        let repo = Arc::new(InMemoryConditionRepository::new());
        let feed = Arc::new(FixedFeed::with("BTC", d("100")));
        let seeder = EmaSeeder::new(feed.clone(), SeedPolicy::default());
        let svc = ConditionService::new(repo, feed.clone(), Arc::new(FixedRates::default()), seeder);

        let created = svc.create_ema("chat-1", "BTC", "USD").await.unwrap();

        let feed_ts = FixedFeed::CURRENT_TS;
        assert_eq!(created.condition.start_ts, feed_ts);
        let mut asked = feed.asked();
        asked.sort_unstable();
        assert_eq!(asked.len(), 20);
        assert_eq!(asked.last(), Some(&feed_ts));
        assert_eq!(asked.first(), Some(&(feed_ts - 19 * SECS_PER_DAY)));
    }

    #[tokio::test]
    async fn summaries_describe_each_condition() {
        let (_, svc) = service("100");
        svc.create_percent("chat-1", "BTC", "USD", d("5"), d("3"))
            .await
            .unwrap();
        svc.create_value("chat-1", "BTC", "USD", d("110"), d("90"))
            .await
            .unwrap();

        let lines = svc.summaries(" chat-1 ").await.unwrap();
        assert_eq!(
            lines,
            vec![
                "BTC PERCENT -3.00% / +5.00% from 100.00 USD (active)".to_string(),
                "BTC VALUE [90.00 .. 110.00] USD (active)".to_string(),
            ]
        );
        assert!(svc.summaries("chat-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deletes_by_key_id_and_owner() {
        let (repo, svc) = service("100");
        let v = svc
            .create_value("chat-1", "BTC", "USD", d("110"), d("90"))
            .await
            .unwrap();
        svc.create_percent("chat-1", "BTC", "USD", d("5"), d("3"))
            .await
            .unwrap();
        svc.create_percent("chat-2", "BTC", "USD", d("5"), d("3"))
            .await
            .unwrap();

        assert!(svc.delete("chat-1", "btc", ConditionKind::Percent).await.unwrap());
        assert!(!svc.delete("chat-1", "btc", ConditionKind::Percent).await.unwrap());
        assert!(svc.delete_by_id(&v.condition.id).await.unwrap());
        assert!(svc.list("chat-1").await.unwrap().is_empty());

        assert_eq!(svc.delete_all("chat-2").await.unwrap(), 1);
        assert!(repo.is_empty());
    }
}
