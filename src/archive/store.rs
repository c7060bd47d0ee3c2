use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One record subject to retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Full row contents, exported verbatim to backups.
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "database-sqlite")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store misconfigured: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Backing store of the records the archiver purges.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Up to `limit` records created strictly before `cutoff`. With `ordered`
    /// the oldest records come first; otherwise the backend picks whatever
    /// is cheapest.
    async fn fetch_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
        ordered: bool,
    ) -> StoreResult<Vec<StoredRecord>>;

    /// Delete the given ids. Returns how many rows were actually removed.
    async fn delete(&self, ids: &[i64]) -> StoreResult<u64>;

    /// Reclaim space left by deleted records.
    async fn compact(&self) -> StoreResult<()>;

    /// Total number of records held.
    async fn count(&self) -> StoreResult<u64>;
}

/// Records kept in process memory, keyed by id.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<i64, StoredRecord>>,
    compactions: Mutex<u64>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: StoredRecord) {
        self.records.lock().insert(record.id, record);
    }

    /// Insert a record with an empty payload.
    pub fn insert_at(&self, id: i64, created_at: DateTime<Utc>) {
        self.insert(StoredRecord {
            id,
            created_at,
            payload: serde_json::json!({ "id": id }),
        });
    }

    pub fn ids(&self) -> Vec<i64> {
        self.records.lock().keys().copied().collect()
    }

    /// Number of times `compact` ran.
    pub fn compactions(&self) -> u64 {
        *self.compactions.lock()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
        ordered: bool,
    ) -> StoreResult<Vec<StoredRecord>> {
        let records = self.records.lock();
        let mut matching: Vec<StoredRecord> = records
            .values()
            .filter(|r| r.created_at < cutoff)
            .cloned()
            .collect();
        if ordered {
            matching.sort_by_key(|r| (r.created_at, r.id));
        }
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn delete(&self, ids: &[i64]) -> StoreResult<u64> {
        let mut records = self.records.lock();
        Ok(ids.iter().filter(|id| records.remove(*id).is_some()).count() as u64)
    }

    async fn compact(&self) -> StoreResult<()> {
        *self.compactions.lock() += 1;
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.records.lock().len() as u64)
    }
}
