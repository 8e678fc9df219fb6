//! Fixed-point helpers shared by evaluators, seeding and persistence.
//!
//! Every price and percentage that leaves this crate or takes part in a
//! comparison is rounded to [`PRICE_DP`] fractional digits, half-up.

use std::str::FromStr;

use anyhow::{Context, anyhow};
use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits kept for prices and percentages.
pub const PRICE_DP: u32 = 2;

/// Fractional digits kept for currency multipliers.
pub const RATE_DP: u32 = 4;

/// Round half-up (away from zero on a tie) to `dp` digits.
pub fn round_half_up(v: Decimal, dp: u32) -> Decimal {
    v.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Price rounding used throughout the engine.
pub fn round_price(v: Decimal) -> Decimal {
    round_half_up(v, PRICE_DP)
}

/// Converts a feed-native price into the quote currency.
pub fn convert(price: Decimal, rate: Decimal) -> Decimal {
    round_price(price * rate)
}

/// Parses a numeric string coming from an external source.
///
/// Everything except digits, `.` and a leading `-` is dropped first, so values
/// like `"64,012.5 USDT"` still parse.
pub fn parse_lenient(raw: &str) -> anyhow::Result<Decimal> {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-');
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if digits.is_empty() {
        return Err(anyhow!("no numeric content in {raw:?}"));
    }

    let v = Decimal::from_str(&digits).with_context(|| format!("invalid decimal {raw:?}"))?;
    Ok(if negative { -v } else { v })
}

/* =========================
Row conversions
========================= */

pub fn decimal_from_column(v: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(v).with_context(|| format!("invalid decimal column value {v:?}"))
}

pub fn opt_decimal_from_column(v: Option<String>) -> anyhow::Result<Option<Decimal>> {
    v.as_deref().map(decimal_from_column).transpose()
}
