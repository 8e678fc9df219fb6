use thiserror::Error;

use crate::condition::model::ConditionKind;

/// Failure taxonomy of a single evaluation unit.
///
/// None of these ever escapes the unit that produced it; the scheduler logs
/// them and moves on.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Price feed transport or parse failure. Transient.
    #[error("price feed unavailable for {asset}: {reason}")]
    FeedUnavailable { asset: String, reason: String },

    /// Currency rate lookup failed. Transient.
    #[error("conversion to {currency} unavailable: {reason}")]
    ConversionUnavailable { currency: String, reason: String },

    /// The state change computed for this tick could not be stored.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Rejections raised while creating a condition, before any seeding or storage.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("owner must not be empty")]
    EmptyOwner,

    #[error("asset must not be empty")]
    EmptyAsset,

    #[error("quote currency must not be empty")]
    EmptyQuoteCurrency,

    #[error("{kind} bound `{field}` must be positive")]
    NonPositive {
        kind: ConditionKind,
        field: &'static str,
    },

    #[error("lower boundary must be below upper boundary")]
    BoundsOutOfOrder,

    #[error("start price must be positive to anchor a percent band")]
    NonPositiveStartPrice,
}

impl EngineError {
    pub fn feed(asset: &str, e: impl std::fmt::Display) -> Self {
        EngineError::FeedUnavailable {
            asset: asset.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn conversion(currency: &str, e: impl std::fmt::Display) -> Self {
        EngineError::ConversionUnavailable {
            currency: currency.to_string(),
            reason: e.to_string(),
        }
    }

    /// Keeps the whole context chain of a repository error.
    pub fn persistence(e: anyhow::Error) -> Self {
        EngineError::Persistence(format!("{e:#}"))
    }

    /// Transient errors are expected to clear up by the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::FeedUnavailable { .. } | EngineError::ConversionUnavailable { .. }
        )
    }
}
