use rust_decimal::Decimal;

use super::{Evaluation, PriceObservation, event_for, messages};
use crate::condition::model::Condition;

/// Which side of a band the price left through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Breach {
    Upper,
    Lower,
}

/// Inclusive band check. The upper side wins if both hold (degenerate band).
pub fn breach(price: Decimal, upper: Decimal, lower: Decimal) -> Option<Breach> {
    if price >= upper {
        Some(Breach::Upper)
    } else if price <= lower {
        Some(Breach::Lower)
    } else {
        None
    }
}

pub fn evaluate(
    condition: &Condition,
    upper: Decimal,
    lower: Decimal,
    obs: &PriceObservation,
) -> Evaluation {
    let Some(side) = breach(obs.price, upper, lower) else {
        return Evaluation::unchanged();
    };

    let mut next = condition.clone();
    next.mark_triggered(obs.ts);

    let message = messages::value_triggered(condition, side, obs.price);

    Evaluation {
        updated: Some(next),
        event: Some(event_for(condition, message)),
    }
}
