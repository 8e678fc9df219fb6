pub mod condition;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod evaluator;
pub mod feed;
pub mod metrics;
pub mod notifier;
pub mod scheduler;
pub mod seeder;

pub mod error;
pub mod numeric;
pub mod time;
