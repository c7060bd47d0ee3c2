//! Retention archiver.
//!
//! Purges records older than a cutoff in batches, exporting each batch to a
//! backup sink before deleting it. Deletions are idempotent: a record that
//! was archived is gone, so re-running with the same window archives only
//! records that aged past the cutoff since.

mod backup;
mod optimizer;
#[cfg(feature = "database-sqlite")]
mod sqlite;
mod store;

use std::{fmt, sync::Arc, time::Instant};

pub use backup::*;
use chrono::Duration;
pub use optimizer::*;
use serde::{Deserialize, Serialize};
#[cfg(feature = "database-sqlite")]
pub use sqlite::*;
pub use store::*;

use crate::{clock::Clock, config::StoreConfig, observability::metrics};

/// Upper bound on an aggressive batch.
pub const MAX_AGGRESSIVE_BATCH: u32 = 20_000;
const AGGRESSIVE_BATCH_FACTOR: u32 = 4;

/// How an archive pass treats batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMode {
    /// Back up, oldest first, no compaction.
    Standard,
    /// Like `Standard`, then compact the store.
    Compact,
    /// Larger unordered batches, no backup, no compaction.
    Aggressive,
}

impl ArchiveMode {
    pub fn optimize(&self) -> bool {
        matches!(self, ArchiveMode::Compact)
    }

    pub fn aggressive(&self) -> bool {
        matches!(self, ArchiveMode::Aggressive)
    }

    pub fn skip_backup(&self) -> bool {
        matches!(self, ArchiveMode::Aggressive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveMode::Standard => "standard",
            ArchiveMode::Compact => "compact",
            ArchiveMode::Aggressive => "aggressive",
        }
    }

    /// Batch size actually used for a configured size.
    pub fn effective_batch(&self, batch_size: u32) -> u32 {
        let batch_size = batch_size.max(1);
        if self.aggressive() {
            batch_size
                .saturating_mul(AGGRESSIVE_BATCH_FACTOR)
                .min(MAX_AGGRESSIVE_BATCH)
        } else {
            batch_size
        }
    }
}

impl fmt::Display for ArchiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of an archive pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStage {
    Fetch,
    Export,
    Delete,
    Compact,
}

impl fmt::Display for ArchiveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveStage::Fetch => "fetch",
            ArchiveStage::Export => "export",
            ArchiveStage::Delete => "delete",
            ArchiveStage::Compact => "compact",
        })
    }
}

/// An archive pass stopped early.
///
/// `archived` counts the records deleted before the failure; they stay
/// deleted.
#[derive(Debug, thiserror::Error)]
#[error("archive failed during {stage} after {archived} records: {source}")]
pub struct ArchiveError {
    pub archived: u64,
    pub stage: ArchiveStage,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ArchiveError {
    fn new(
        archived: u64,
        stage: ArchiveStage,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            archived,
            stage,
            source: Box::new(source),
        }
    }
}

pub struct Archiver {
    store: Arc<dyn RecordStore>,
    backup: Arc<dyn BackupSink>,
    clock: Arc<dyn Clock>,
    optimizer: BatchOptimizer,
}

impl Archiver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        backup: Arc<dyn BackupSink>,
        clock: Arc<dyn Clock>,
        optimizer: BatchOptimizer,
    ) -> Self {
        Self {
            store,
            backup,
            clock,
            optimizer,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn optimizer(&self) -> &BatchOptimizer {
        &self.optimizer
    }

    /// Archive every record created more than `days` days ago.
    pub async fn archive(
        &self,
        days: u32,
        mode: ArchiveMode,
        batch_size: u32,
    ) -> Result<u64, ArchiveError> {
        let cutoff = self.clock.now() - Duration::days(days as i64);
        let limit = mode.effective_batch(batch_size);
        let mut archived: u64 = 0;

        tracing::info!(
            store = self.store.name(),
            days,
            %mode,
            batch_size = limit,
            cutoff = %cutoff,
            "Starting archive pass"
        );

        loop {
            let started = Instant::now();

            let batch = self
                .store
                .fetch_before(cutoff, limit, !mode.aggressive())
                .await
                .map_err(|e| ArchiveError::new(archived, ArchiveStage::Fetch, e))?;
            if batch.is_empty() {
                break;
            }

            if !mode.skip_backup() {
                self.backup
                    .export(&batch)
                    .await
                    .map_err(|e| ArchiveError::new(archived, ArchiveStage::Export, e))?;
            }

            let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
            let deleted = match self.store.delete(&ids).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    self.optimizer.record(BatchSample {
                        batch_size: limit,
                        records: 0,
                        duration: started.elapsed(),
                        success: false,
                    });
                    return Err(ArchiveError::new(archived, ArchiveStage::Delete, e));
                }
            };
            archived += deleted;

            let elapsed = started.elapsed();
            self.optimizer.record(BatchSample {
                batch_size: limit,
                records: deleted,
                duration: elapsed,
                success: true,
            });
            metrics::record_records_archived(mode.as_str(), deleted);
            metrics::record_archive_batch(mode.as_str(), elapsed.as_secs_f64());

            tracing::debug!(
                fetched = batch.len(),
                deleted,
                archived,
                elapsed_ms = elapsed.as_millis() as u64,
                "Archived batch"
            );

            if deleted == 0 {
                // Someone else removed these rows; fetching again would spin.
                tracing::warn!(fetched = batch.len(), "Batch deleted no rows, stopping pass");
                break;
            }
            if (batch.len() as u64) < limit as u64 {
                break;
            }
        }

        if mode.optimize() {
            self.store
                .compact()
                .await
                .map_err(|e| ArchiveError::new(archived, ArchiveStage::Compact, e))?;
            tracing::debug!(store = self.store.name(), "Compacted store");
        }

        tracing::info!(archived, %mode, "Archive pass complete");
        Ok(archived)
    }
}

/// Build the record store named in configuration.
pub async fn build_store(config: &StoreConfig) -> StoreResult<Arc<dyn RecordStore>> {
    match config {
        StoreConfig::Memory => {
            tracing::warn!("Using in-memory record store; nothing will persist across restarts");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
        #[cfg(feature = "database-sqlite")]
        StoreConfig::Sqlite(sqlite) => Ok(Arc::new(SqliteRecordStore::connect(sqlite).await?)),
        #[cfg(not(feature = "database-sqlite"))]
        StoreConfig::Sqlite(_) => Err(StoreError::Config(
            "store type 'sqlite' requires the 'database-sqlite' feature".into(),
        )),
    }
}
