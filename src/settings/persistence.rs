use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::PolicyVersion;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt settings file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings backend unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the policy version list.
#[async_trait]
pub trait SettingsPersistence: Send + Sync {
    /// All stored versions; empty when nothing was saved yet.
    async fn load(&self) -> Result<Vec<PolicyVersion>, PersistenceError>;

    /// Replace the stored versions. Must be atomic: after a failure the
    /// previous contents are still readable.
    async fn save(&self, versions: &[PolicyVersion]) -> Result<(), PersistenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    versions: Vec<PolicyVersion>,
}

/// Versions stored as a JSON document, replaced via write-to-temp + rename.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl SettingsPersistence for JsonFileSettings {
    async fn load(&self) -> Result<Vec<PolicyVersion>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let file: SettingsFile =
            serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(file.versions)
    }

    async fn save(&self, versions: &[PolicyVersion]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let body = serde_json::to_vec_pretty(&SettingsFile {
            versions: versions.to_vec(),
        })
        .map_err(|source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &body)
            .await
            .map_err(|e| self.io_err(e))?;
        file.sync_all().await.map_err(|e| self.io_err(e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        tracing::debug!(path = %self.path.display(), versions = versions.len(), "Saved settings");
        Ok(())
    }
}

/// Process-local persistence.
#[derive(Debug, Default)]
pub struct MemorySettings {
    versions: Mutex<Vec<PolicyVersion>>,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemorySettings {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsPersistence for MemorySettings {
    async fn load(&self) -> Result<Vec<PolicyVersion>, PersistenceError> {
        Ok(self.versions.lock().clone())
    }

    async fn save(&self, versions: &[PolicyVersion]) -> Result<(), PersistenceError> {
        #[cfg(test)]
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("writes disabled".into()));
        }
        *self.versions.lock() = versions.to_vec();
        Ok(())
    }
}
