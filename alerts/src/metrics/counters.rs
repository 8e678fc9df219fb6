use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub ticks: Arc<AtomicU64>,

    // per evaluation unit
    pub evaluated: Arc<AtomicU64>,
    pub triggered: Arc<AtomicU64>,
    /// Feed or rate unavailable; retried next tick.
    pub skipped: Arc<AtomicU64>,
    /// Persistence failures and panics.
    pub failed: Arc<AtomicU64>,
    /// Units not started because the same condition was still in flight.
    pub overlapped: Arc<AtomicU64>,

    // delivery
    pub dispatched: Arc<AtomicU64>,
    pub dispatch_failed: Arc<AtomicU64>,
}

/// Point-in-time copy of [`Counters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub ticks: u64,
    pub evaluated: u64,
    pub triggered: u64,
    pub skipped: u64,
    pub failed: u64,
    pub overlapped: u64,
    pub dispatched: u64,
    pub dispatch_failed: u64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            ticks: get(&self.ticks),
            evaluated: get(&self.evaluated),
            triggered: get(&self.triggered),
            skipped: get(&self.skipped),
            failed: get(&self.failed),
            overlapped: get(&self.overlapped),
            dispatched: get(&self.dispatched),
            dispatch_failed: get(&self.dispatch_failed),
        }
    }
}
