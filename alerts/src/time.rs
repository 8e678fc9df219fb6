use chrono::Utc;

/// Unix time in whole seconds.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub const SECS_PER_DAY: i64 = 24 * 60 * 60;
