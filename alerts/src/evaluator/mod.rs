//! Per-kind condition evaluation.
//!
//! Evaluators are pure: they take a condition and one price observation and
//! return the state to persist plus the event to dispatch, if any. All I/O
//! (feed, store, notifier) lives in the scheduler's evaluation unit.

pub mod ema;
pub mod messages;
pub mod percent;
pub mod value;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::condition::model::{Condition, ConditionKind, Threshold};
use ema::EmaSmoothing;

/// Current price of a condition's asset, already in its quote currency and
/// rounded to 2 digits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceObservation {
    pub price: Decimal,
    /// Unix seconds reported by the feed.
    pub ts: i64,
}

/// Message for a condition owner.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEvent {
    pub condition_id: Uuid,
    pub owner: String,
    pub kind: ConditionKind,
    pub message: String,
}

/// Result of one evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// State to persist; `None` means nothing changed.
    pub updated: Option<Condition>,
    /// Event to dispatch after the state has been persisted.
    pub event: Option<AlertEvent>,
}

impl Evaluation {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.updated.is_none() && self.event.is_none()
    }
}

/// Evaluates `condition` against `obs`, dispatching on its kind.
///
/// Retired single-shot conditions are a no-op, whatever the price.
pub fn evaluate(condition: &Condition, obs: &PriceObservation, alpha: EmaSmoothing) -> Evaluation {
    if !condition.needs_evaluation() {
        return Evaluation::unchanged();
    }

    match &condition.threshold {
        Threshold::Value { upper, lower } => value::evaluate(condition, *upper, *lower, obs),
        Threshold::Percent {
            up_percent,
            down_percent,
        } => percent::evaluate(condition, *up_percent, *down_percent, obs),
        Threshold::Ema {
            ema_value,
            is_above,
        } => ema::evaluate(condition, *ema_value, *is_above, obs, alpha),
    }
}

pub(crate) fn event_for(condition: &Condition, message: String) -> AlertEvent {
    AlertEvent {
        condition_id: condition.id,
        owner: condition.owner.clone(),
        kind: condition.kind(),
        message,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn retired_conditions_are_never_reevaluated() {
        let mut c = condition(
            Threshold::Value {
                upper: d("110"),
                lower: d("90"),
            },
            "100",
        );
        c.mark_triggered(5);

        for price in ["50", "100", "200"] {
            let out = evaluate(&c, &obs(price, 10), EmaSmoothing::default());
            assert!(out.is_noop(), "retired condition reacted to {price}");
        }
    }

    #[test]
    fn dispatch_follows_threshold_variant() {
        let value = condition(
            Threshold::Value {
                upper: d("110"),
                lower: d("90"),
            },
            "100",
        );
        let percent = condition(
            Threshold::Percent {
                up_percent: d("5"),
                down_percent: d("3"),
            },
            "100",
        );
        let ema = condition(
            Threshold::Ema {
                ema_value: d("100"),
                is_above: None,
            },
            "100",
        );

        let alpha = EmaSmoothing::default();
        assert_eq!(
            evaluate(&value, &obs("110", 1), alpha).event.map(|e| e.kind),
            Some(ConditionKind::Value)
        );
        assert_eq!(
            evaluate(&percent, &obs("105", 1), alpha).event.map(|e| e.kind),
            Some(ConditionKind::Percent)
        );
        // First EMA observation only initializes the side, no event.
        let out = evaluate(&ema, &obs("120", 1), alpha);
        assert!(out.updated.is_some());
        assert!(out.event.is_none());
    }
}
