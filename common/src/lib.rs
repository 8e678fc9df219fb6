pub mod logger;

pub use logger::{TraceId, init_tracing, warn_if_slow};
