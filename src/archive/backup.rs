use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::store::StoredRecord;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("I/O error writing backup {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record {id}: {source}")]
    Serialize {
        id: i64,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable destination for records about to be deleted.
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Persist `batch`. Returning `Ok` means the batch survives a crash.
    async fn export(&self, batch: &[StoredRecord]) -> Result<(), BackupError>;
}

/// One JSON-lines file per batch in a directory, fsynced before returning.
#[derive(Debug, Clone)]
pub struct JsonlBackupSink {
    dir: PathBuf,
}

impl JsonlBackupSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(batch: &[StoredRecord]) -> String {
        let first = batch.first().map(|r| r.id).unwrap_or_default();
        let last = batch.last().map(|r| r.id).unwrap_or_default();
        let suffix = Uuid::new_v4().simple().to_string();
        format!("records-{first}-{last}-{}.jsonl", &suffix[..8])
    }
}

#[async_trait]
impl BackupSink for JsonlBackupSink {
    async fn export(&self, batch: &[StoredRecord]) -> Result<(), BackupError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut body = Vec::with_capacity(batch.len() * 128);
        for record in batch {
            serde_json::to_writer(&mut body, record).map_err(|source| {
                BackupError::Serialize {
                    id: record.id,
                    source,
                }
            })?;
            body.push(b'\n');
        }

        let path = self.dir.join(Self::file_name(batch));
        let io_err = |source| BackupError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let mut file = tokio::fs::File::create(&path).await.map_err(io_err)?;
        file.write_all(&body).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;

        tracing::debug!(path = %path.display(), records = batch.len(), "Exported backup batch");
        Ok(())
    }
}

/// Discards batches. Used when backups are not wanted at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackupSink;

#[async_trait]
impl BackupSink for NullBackupSink {
    async fn export(&self, _batch: &[StoredRecord]) -> Result<(), BackupError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn test_jsonl_export_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlBackupSink::new(dir.path().join("backups"));
        let batch: Vec<StoredRecord> = (1..=3)
            .map(|id| StoredRecord {
                id,
                created_at: Utc::now(),
                payload: serde_json::json!({ "id": id, "kind": "event" }),
            })
            .collect();

        sink.export(&batch).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(sink.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("records-1-3-"));

        let contents = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<StoredRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, batch);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlBackupSink::new(dir.path());
        sink.export(&[]).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
