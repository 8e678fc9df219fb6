use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Conditions. Decimals are stored as TEXT to keep them exact.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS conditions (
  id TEXT PRIMARY KEY,
  owner TEXT NOT NULL,
  asset TEXT NOT NULL,
  quote_currency TEXT NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('VALUE','PERCENT','EMA')),
  active INTEGER NOT NULL CHECK (active IN (0,1)),
  start_price TEXT NOT NULL,
  start_ts BIGINT NOT NULL,
  trigger_ts BIGINT,

  upper_bound TEXT,
  lower_bound TEXT,
  up_percent TEXT,
  down_percent TEXT,

  ema_value TEXT,
  is_above INTEGER CHECK (is_above IN (0,1))
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_conditions_key ON conditions(owner, asset, kind);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_conditions_kind ON conditions(kind, active);"#)
        .execute(pool)
        .await?;

    Ok(())
}
