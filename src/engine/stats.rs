use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Process-lifetime counters reported in status.
#[derive(Debug)]
pub struct EngineStats {
    started_at: DateTime<Utc>,
    total_archived: AtomicU64,
    last_cleanup: RwLock<Option<DateTime<Utc>>>,
}

impl EngineStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_archived: AtomicU64::new(0),
            last_cleanup: RwLock::new(None),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Count records deleted by any retention pass, successful or not.
    pub fn add_archived(&self, count: u64) {
        self.total_archived.fetch_add(count, Ordering::Relaxed);
    }

    /// Mark a retention pass as completed at `at`.
    pub fn record_cleanup(&self, at: DateTime<Utc>) {
        let mut last = self.last_cleanup.write();
        if last.is_none_or(|prev| prev < at) {
            *last = Some(at);
        }
    }

    pub fn total_archived(&self) -> u64 {
        self.total_archived.load(Ordering::Relaxed)
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        *self.last_cleanup.read()
    }
}
