//! EMA updater and trend-crossing detector.
//!
//! Every tick moves the EMA towards the current price. The side of the EMA
//! the price sits on is remembered in `is_above`; an event is emitted only
//! when that side flips.

use std::fmt;

use rust_decimal::Decimal;

use super::{Evaluation, PriceObservation, event_for, messages};
use crate::condition::model::{Condition, Threshold};
use crate::numeric::round_price;

/// Smoothing factor `α` of the EMA update, in `(0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmaSmoothing(Decimal);

impl EmaSmoothing {
    /// Flat constant used when nothing else is configured.
    pub const DEFAULT_ALPHA: Decimal = Decimal::from_parts(5, 0, 0, false, 2); // 0.05

    /// Rejects values outside `(0, 1]`.
    pub fn new(alpha: Decimal) -> Option<Self> {
        (alpha > Decimal::ZERO && alpha <= Decimal::ONE).then_some(Self(alpha))
    }

    /// The `2 / (period + 1)` convention.
    pub fn from_period(period: usize) -> Self {
        let denom = Decimal::from(period.max(1) as u64 + 1);
        Self(Decimal::TWO / denom)
    }

    pub fn alpha(&self) -> Decimal {
        self.0
    }
}

impl Default for EmaSmoothing {
    fn default() -> Self {
        Self(Self::DEFAULT_ALPHA)
    }
}

impl fmt::Display for EmaSmoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `α·price + (1-α)·prev`, rounded to 2 digits.
pub fn next_ema(prev: Decimal, price: Decimal, alpha: EmaSmoothing) -> Decimal {
    let a = alpha.alpha();
    round_price(a * price + (Decimal::ONE - a) * prev)
}

/// Direction of a trend crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crossing {
    /// Price moved from below to above the EMA.
    Upward,
    /// Price moved from above to below the EMA.
    Downward,
}

/// One EMA tick, before it is applied to a condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmaStep {
    pub ema_value: Decimal,
    pub is_above: bool,
    pub crossing: Option<Crossing>,
}

pub fn step(
    ema_value: Decimal,
    is_above: Option<bool>,
    price: Decimal,
    alpha: EmaSmoothing,
) -> EmaStep {
    let new_ema = next_ema(ema_value, price, alpha);
    let currently_above = price > new_ema;

    let crossing = match is_above {
        // First observation only records the side.
        None => None,
        Some(prev) if prev != currently_above => Some(if currently_above {
            Crossing::Upward
        } else {
            Crossing::Downward
        }),
        Some(_) => None,
    };

    EmaStep {
        ema_value: new_ema,
        is_above: currently_above,
        crossing,
    }
}

/// EMA conditions always produce a state change: the EMA moves every tick.
pub fn evaluate(
    condition: &Condition,
    ema_value: Decimal,
    is_above: Option<bool>,
    obs: &PriceObservation,
    alpha: EmaSmoothing,
) -> Evaluation {
    let s = step(ema_value, is_above, obs.price, alpha);

    let mut next = condition.clone();
    next.active = true;
    next.threshold = Threshold::Ema {
        ema_value: s.ema_value,
        is_above: Some(s.is_above),
    };

    let event = s.crossing.map(|dir| {
        event_for(
            condition,
            messages::trend_crossed(condition, dir, obs.price, s.ema_value),
        )
    });

    Evaluation {
        updated: Some(next),
        event,
    }
}
