use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Engine counters, logged periodically and from tests.
#[derive(Default)]
pub struct EngineMetrics {
    pub submissions: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub timeouts: AtomicU64,
    pub concurrency_aborts: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn log_snapshot(&self, conflict_retries: u64) {
        info!(
            submissions = Self::get(&self.submissions),
            accepted = Self::get(&self.accepted),
            rejected = Self::get(&self.rejected),
            timeouts = Self::get(&self.timeouts),
            concurrency_retries = conflict_retries,
            concurrency_aborts = Self::get(&self.concurrency_aborts),
            "engine metrics"
        );
    }
}
