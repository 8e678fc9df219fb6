//! Texts sent to condition owners.

use rust_decimal::Decimal;

use super::ema::Crossing;
use super::percent::Move;
use super::value::Breach;
use crate::condition::model::{Condition, Threshold};

pub fn value_triggered(c: &Condition, side: Breach, price: Decimal) -> String {
    let which = match side {
        Breach::Upper => "rose above the upper boundary",
        Breach::Lower => "fell below the lower boundary",
    };
    format!(
        "🚨 {} price {which}, now at {price:.2} {}",
        c.asset, c.quote_currency
    )
}

pub fn percent_triggered(c: &Condition, dir: Move, change: Decimal, price: Decimal) -> String {
    let verb = match dir {
        Move::Up => "rose",
        Move::Down => "fell",
    };
    format!(
        "🚨 {} price {verb} by {:.2}% (to {price:.2} {})",
        c.asset,
        change.abs(),
        c.quote_currency
    )
}

pub fn trend_crossed(c: &Condition, dir: Crossing, price: Decimal, ema: Decimal) -> String {
    let (trend, marker) = match dir {
        Crossing::Upward => ("upward", "📈"),
        Crossing::Downward => ("downward", "📉"),
    };
    format!(
        "🚨 {trend} trend detected for {}\n💰 Current price: {price:.2} {quote}\n{marker} EMA: {ema:.2} {quote}",
        c.asset,
        quote = c.quote_currency
    )
}

/// Confirmation returned to the requester once a condition is stored.
pub fn created(c: &Condition) -> String {
    let quote = &c.quote_currency;
    let head = format!(
        "✅ {} alert set for {}\n💰 Current price: {:.2} {quote}",
        c.kind(),
        c.asset,
        c.start_price
    );

    match &c.threshold {
        Threshold::Value { upper, lower } => format!(
            "{head}\n📈 Upper boundary: {upper:.2} {quote}\n📉 Lower boundary: {lower:.2} {quote}"
        ),
        Threshold::Percent {
            up_percent,
            down_percent,
        } => format!("{head}\n📈 Rise: +{up_percent:.2}%\n📉 Fall: -{down_percent:.2}%"),
        Threshold::Ema { ema_value, .. } => format!("{head}\n📈 Initial EMA: {ema_value:.2} {quote}"),
    }
}

/// One line per condition, as shown by a listing.
pub fn summary_line(c: &Condition) -> String {
    let state = if c.active { "active" } else { "triggered" };
    match &c.threshold {
        Threshold::Value { upper, lower } => format!(
            "{} VALUE [{lower:.2} .. {upper:.2}] {} ({state})",
            c.asset, c.quote_currency
        ),
        Threshold::Percent {
            up_percent,
            down_percent,
        } => format!(
            "{} PERCENT -{down_percent:.2}% / +{up_percent:.2}% from {:.2} {} ({state})",
            c.asset, c.start_price, c.quote_currency
        ),
        Threshold::Ema {
            ema_value,
            is_above,
        } => {
            let side = match is_above {
                Some(true) => "price above",
                Some(false) => "price below",
                None => "side pending",
            };
            format!(
                "{} EMA {ema_value:.2} {} ({side})",
                c.asset, c.quote_currency
            )
        }
    }
}
