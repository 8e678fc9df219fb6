use rust_decimal::Decimal;

use super::{Evaluation, PriceObservation, event_for, messages};
use crate::condition::model::Condition;
use crate::numeric::round_price;

/// Direction of a percent-band trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Move {
    Up,
    Down,
}

/// `(price - start) / start * 100`, rounded half-up to 2 digits.
/// `None` when `start` is zero.
pub fn percent_change(start: Decimal, price: Decimal) -> Option<Decimal> {
    if start.is_zero() {
        return None;
    }
    Some(round_price((price - start) / start * Decimal::ONE_HUNDRED))
}

pub fn classify(change: Decimal, up_percent: Decimal, down_percent: Decimal) -> Option<Move> {
    if change >= up_percent {
        Some(Move::Up)
    } else if change <= -down_percent {
        Some(Move::Down)
    } else {
        None
    }
}

pub fn evaluate(
    condition: &Condition,
    up_percent: Decimal,
    down_percent: Decimal,
    obs: &PriceObservation,
) -> Evaluation {
    let Some(change) = percent_change(condition.start_price, obs.price) else {
        tracing::warn!(
            condition_id = %condition.id,
            "percent condition has zero start price; never triggers"
        );
        return Evaluation::unchanged();
    };

    let Some(direction) = classify(change, up_percent, down_percent) else {
        return Evaluation::unchanged();
    };

    let mut next = condition.clone();
    next.mark_triggered(obs.ts);

    let message = messages::percent_triggered(condition, direction, change, obs.price);

    Evaluation {
        updated: Some(next),
        event: Some(event_for(condition, message)),
    }
}
