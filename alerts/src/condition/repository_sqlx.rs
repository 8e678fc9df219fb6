use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::condition::model::{Condition, ConditionKey, ConditionKind, Threshold};
use crate::condition::repository::ConditionRepository;
use crate::numeric::{decimal_from_column, opt_decimal_from_column};

/// SQLx-backed implementation of ConditionRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxConditionRepository {
    pool: AnyPool,
}

impl SqlxConditionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(
        &self,
        sql: &'static str,
        binds: &[&str],
    ) -> anyhow::Result<Vec<Condition>> {
        let mut q = sqlx::query(sql);
        for b in binds {
            q = q.bind(b.to_string());
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_condition(&r) {
                Ok(c) => out.push(c),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the batch
                    tracing::warn!(error = %e, "skipping malformed condition row");
                }
            }
        }
        Ok(out)
    }
}

macro_rules! select_conditions {
    ($tail:literal) => {
        concat!(
            r#"
SELECT
  id, owner, asset, quote_currency, kind,
  CASE WHEN active THEN 1 ELSE 0 END AS active_i64,
  start_price, start_ts, trigger_ts,
  upper_bound, lower_bound, up_percent, down_percent,
  ema_value, is_above
FROM conditions
"#,
            $tail
        )
    };
}

#[async_trait]
impl ConditionRepository for SqlxConditionRepository {
    async fn load_active(&self, kind: ConditionKind) -> anyhow::Result<Vec<Condition>> {
        self.fetch_where(
            select_conditions!("WHERE kind = ? AND (active = 1 OR kind = 'EMA');"),
            &[kind.as_str()],
        )
        .await
    }

    async fn fetch_by_id(&self, id: &Uuid) -> anyhow::Result<Option<Condition>> {
        let row = sqlx::query(select_conditions!("WHERE id = ?;"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_condition(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_owner(&self, owner: &str) -> anyhow::Result<Vec<Condition>> {
        self.fetch_where(
            select_conditions!("WHERE owner = ? ORDER BY asset, kind;"),
            &[owner],
        )
        .await
    }

    async fn save(&self, c: &Condition) -> anyhow::Result<()> {
        let cols = ThresholdColumns::from_condition(c);
        let mut tx = self.pool.begin().await?;

        // Replace the previous condition with the same key, if any.
        sqlx::query(
            r#"
DELETE FROM conditions
WHERE id = ? OR (owner = ? AND asset = ? AND kind = ?);
"#,
        )
        .bind(c.id.to_string())
        .bind(c.owner.clone())
        .bind(c.asset.clone())
        .bind(c.kind().as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
INSERT INTO conditions (
  id, owner, asset, quote_currency, kind, active,
  start_price, start_ts, trigger_ts,
  upper_bound, lower_bound, up_percent, down_percent,
  ema_value, is_above
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(c.id.to_string())
        .bind(c.owner.clone())
        .bind(c.asset.clone())
        .bind(c.quote_currency.clone())
        .bind(c.kind().as_str())
        .bind(i64::from(c.active))
        .bind(c.start_price.to_string())
        .bind(c.start_ts)
        .bind(c.trigger_ts)
        .bind(cols.upper_bound)
        .bind(cols.lower_bound)
        .bind(cols.up_percent)
        .bind(cols.down_percent)
        .bind(cols.ema_value)
        .bind(cols.is_above)
        .execute(&mut *tx)
        .await
        .context("insert condition")?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_state(&self, c: &Condition) -> anyhow::Result<bool> {
        let cols = ThresholdColumns::from_condition(c);

        let res = sqlx::query(
            r#"
UPDATE conditions
SET active = ?, trigger_ts = ?, ema_value = ?, is_above = ?
WHERE id = ?;
"#,
        )
        .bind(i64::from(c.active))
        .bind(c.trigger_ts)
        .bind(cols.ema_value)
        .bind(cols.is_above)
        .bind(c.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM conditions WHERE id = ?;")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_by_key(&self, key: &ConditionKey) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM conditions WHERE owner = ? AND asset = ? AND kind = ?;")
            .bind(key.owner.clone())
            .bind(key.asset.clone())
            .bind(key.kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_for_owner(&self, owner: &str) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM conditions WHERE owner = ?;")
            .bind(owner.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

/* =========================
Row mapping + conversions
========================= */

/// Kind-specific columns, all nullable. PERCENT rows also carry the absolute
/// bounds derived from their start price, for display.
#[derive(Default)]
struct ThresholdColumns {
    upper_bound: Option<String>,
    lower_bound: Option<String>,
    up_percent: Option<String>,
    down_percent: Option<String>,
    ema_value: Option<String>,
    is_above: Option<i64>,
}

impl ThresholdColumns {
    fn from_condition(c: &Condition) -> Self {
        match &c.threshold {
            Threshold::Value { upper, lower } => Self {
                upper_bound: Some(upper.to_string()),
                lower_bound: Some(lower.to_string()),
                ..Self::default()
            },
            Threshold::Percent {
                up_percent,
                down_percent,
            } => {
                let (upper, lower) = c.percent_bounds().unzip();
                Self {
                    upper_bound: upper.map(|v| v.to_string()),
                    lower_bound: lower.map(|v| v.to_string()),
                    up_percent: Some(up_percent.to_string()),
                    down_percent: Some(down_percent.to_string()),
                    ..Self::default()
                }
            }
            Threshold::Ema {
                ema_value,
                is_above,
            } => Self {
                ema_value: Some(ema_value.to_string()),
                is_above: is_above.map(i64::from),
                ..Self::default()
            },
        }
    }
}

fn row_to_condition(r: &sqlx::any::AnyRow) -> anyhow::Result<Condition> {
    let id_str: String = r.try_get("id")?;
    let id = Uuid::parse_str(&id_str).context("invalid condition id")?;

    let kind: ConditionKind = r.try_get::<String, _>("kind")?.parse()?;

    let threshold = match kind {
        ConditionKind::Value => Threshold::Value {
            upper: required(r, "upper_bound")?,
            lower: required(r, "lower_bound")?,
        },
        ConditionKind::Percent => Threshold::Percent {
            up_percent: required(r, "up_percent")?,
            down_percent: required(r, "down_percent")?,
        },
        ConditionKind::Ema => Threshold::Ema {
            ema_value: required(r, "ema_value")?,
            is_above: r
                .try_get::<Option<i64>, _>("is_above")?
                .map(|v| v == 1),
        },
    };

    let active_i64: i64 = r.try_get("active_i64")?;

    Ok(Condition {
        id,
        owner: r.try_get("owner")?,
        asset: r.try_get("asset")?,
        quote_currency: r.try_get("quote_currency")?,
        active: active_i64 == 1,
        start_price: decimal_from_column(&r.try_get::<String, _>("start_price")?)?,
        start_ts: r.try_get("start_ts")?,
        trigger_ts: r.try_get("trigger_ts")?,
        threshold,
    })
}

fn required(r: &sqlx::any::AnyRow, column: &str) -> anyhow::Result<Decimal> {
    opt_decimal_from_column(r.try_get(column)?)?
        .ok_or_else(|| anyhow!("missing {column} for condition row"))
}
