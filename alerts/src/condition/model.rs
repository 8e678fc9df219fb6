use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::numeric::round_price;

/// Threshold kind of a condition. Fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Value,
    Percent,
    Ema,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 3] = [
        ConditionKind::Value,
        ConditionKind::Percent,
        ConditionKind::Ema,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Value => "VALUE",
            ConditionKind::Percent => "PERCENT",
            ConditionKind::Ema => "EMA",
        }
    }

    /// EMA conditions never complete; the other kinds fire once.
    pub fn is_single_shot(&self) -> bool {
        !matches!(self, ConditionKind::Ema)
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VALUE" => Ok(ConditionKind::Value),
            "PERCENT" => Ok(ConditionKind::Percent),
            "EMA" => Ok(ConditionKind::Ema),
            other => Err(anyhow::anyhow!("unknown condition kind: {other}")),
        }
    }
}

/// Kind-specific parameters and state.
#[derive(Clone, Debug, PartialEq)]
pub enum Threshold {
    /// Absolute price band, inclusive on both ends.
    Value { upper: Decimal, lower: Decimal },

    /// Band relative to `Condition::start_price`, in percent.
    Percent {
        up_percent: Decimal,
        down_percent: Decimal,
    },

    /// Trend follower. `is_above` is `None` until the first tick observes
    /// which side of the EMA the price is on.
    Ema {
        ema_value: Decimal,
        is_above: Option<bool>,
    },
}

impl Threshold {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Threshold::Value { .. } => ConditionKind::Value,
            Threshold::Percent { .. } => ConditionKind::Percent,
            Threshold::Ema { .. } => ConditionKind::Ema,
        }
    }
}

/// A persisted watch rule on one asset for one owner.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub id: Uuid,
    pub owner: String,
    pub asset: String,
    pub quote_currency: String,

    /// Single-shot kinds: true until the first trigger, then false forever.
    /// EMA: always true.
    pub active: bool,

    /// Price in quote currency when the condition was created.
    pub start_price: Decimal,
    /// Unix seconds.
    pub start_ts: i64,
    /// Unix seconds of the tick that fired a single-shot condition.
    pub trigger_ts: Option<i64>,

    pub threshold: Threshold,
}

/// Uniqueness key: at most one condition per (owner, asset, kind).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConditionKey {
    pub owner: String,
    pub asset: String,
    pub kind: ConditionKind,
}

impl Condition {
    pub fn new(
        owner: impl Into<String>,
        asset: impl Into<String>,
        quote_currency: impl Into<String>,
        start_price: Decimal,
        start_ts: i64,
        threshold: Threshold,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            asset: normalize_code(&asset.into()),
            quote_currency: normalize_code(&quote_currency.into()),
            active: true,
            start_price,
            start_ts,
            trigger_ts: None,
            threshold,
        }
    }

    pub fn kind(&self) -> ConditionKind {
        self.threshold.kind()
    }

    pub fn key(&self) -> ConditionKey {
        ConditionKey {
            owner: self.owner.clone(),
            asset: self.asset.clone(),
            kind: self.kind(),
        }
    }

    /// Whether the scheduler should look at this condition at all.
    pub fn needs_evaluation(&self) -> bool {
        self.active || self.kind() == ConditionKind::Ema
    }

    /// Retires a single-shot condition. Has no effect on EMA conditions or on
    /// conditions that already fired.
    pub fn mark_triggered(&mut self, now_secs: i64) {
        if self.kind().is_single_shot() && self.active {
            self.active = false;
            self.trigger_ts = Some(now_secs);
        }
    }

    /// Absolute bounds of a PERCENT band, for display.
    pub fn percent_bounds(&self) -> Option<(Decimal, Decimal)> {
        match &self.threshold {
            Threshold::Percent {
                up_percent,
                down_percent,
            } => {
                let hundred = Decimal::ONE_HUNDRED;
                let upper = round_price(self.start_price * (hundred + up_percent) / hundred);
                let lower = round_price(self.start_price * (hundred - down_percent) / hundred);
                Some((upper, lower))
            }
            _ => None,
        }
    }
}

/// Asset and currency codes are stored upper-case without surrounding blanks.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
