pub mod memory;
pub mod model;
pub mod repository;
pub mod repository_sqlx;
pub mod service;

pub use model::{Condition, ConditionKey, ConditionKind, Threshold};
pub use repository::ConditionRepository;
