//! Record store, backup, archiver and emergency-remediation configuration.
//!
//! # Example
//!
//! ```toml
//! [store]
//! type = "sqlite"
//! url = "sqlite:///var/lib/app/app.db"
//! table = "events"
//! timestamp_column = "created_at"
//!
//! [backup]
//! dir = "/var/backups/vigil"
//!
//! [archive]
//! target_batch_secs = 300
//!
//! [emergency]
//! temp_dirs = ["/var/tmp/app"]
//! temp_max_age_hours = 24
//! log_dirs = ["/var/log/app"]
//! log_max_age_days = 2
//! retention_days = 7
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the records subject to retention live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store. Intended for local development and tests.
    Memory,
    /// SQLite table reached through sqlx (requires `database-sqlite`).
    Sqlite(SqliteStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Sqlite(sqlite) => sqlite.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// sqlx connection URL, e.g. `sqlite:///var/lib/app/app.db`.
    pub url: String,

    /// Table holding the records.
    pub table: String,

    /// Integer primary key column.
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Column holding the record creation time.
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_timestamp_column() -> String {
    "created_at".to_string()
}

fn default_max_connections() -> u32 {
    4
}

impl SqliteStoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("store.url must not be empty".into());
        }
        for (field, ident) in [
            ("store.table", &self.table),
            ("store.id_column", &self.id_column),
            ("store.timestamp_column", &self.timestamp_column),
        ] {
            if !is_identifier(ident) {
                return Err(format!(
                    "{field} must be a plain SQL identifier (letters, digits, underscore), got '{ident}'"
                ));
            }
        }
        if self.max_connections == 0 {
            return Err("store.max_connections must be at least 1".into());
        }
        Ok(())
    }
}

/// Identifiers are interpolated into SQL, so only the simplest form is allowed.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Backup destination for records exported before deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Directory receiving one JSON-lines file per exported batch.
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

/// Archiver tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Batch wall time the batch-size recommendation steers towards.
    /// Default: 300 (5 minutes)
    #[serde(default = "default_target_batch_secs")]
    pub target_batch_secs: u64,

    /// Above this process-host memory usage the recommendation backs off
    /// harder.
    /// Default: 80
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            target_batch_secs: default_target_batch_secs(),
            max_memory_percent: default_max_memory_percent(),
        }
    }
}

fn default_target_batch_secs() -> u64 {
    300
}

fn default_max_memory_percent() -> f32 {
    80.0
}

/// Degraded-mode cascade run when disk pressure latches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyConfig {
    /// Directories holding transient files that may be purged.
    #[serde(default)]
    pub temp_dirs: Vec<PathBuf>,

    /// Temp files older than this are purged.
    /// Default: 24
    #[serde(default = "default_temp_max_age_hours")]
    pub temp_max_age_hours: u64,

    /// Directories holding log files that may be pruned.
    #[serde(default)]
    pub log_dirs: Vec<PathBuf>,

    /// Log files older than this are pruned.
    /// Default: 2
    #[serde(default = "default_log_max_age_days")]
    pub log_max_age_days: u64,

    /// Shortened retention window used for the emergency archive step. The
    /// effective window is the smaller of this and the live policy's.
    /// Default: 7
    #[serde(default = "default_emergency_retention_days")]
    pub retention_days: u32,

    /// Limit on each cascade step. A step that overruns is recorded as
    /// failed and the cascade moves on, so the closing alert still goes out.
    /// Default: 600
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            temp_dirs: Vec::new(),
            temp_max_age_hours: default_temp_max_age_hours(),
            log_dirs: Vec::new(),
            log_max_age_days: default_log_max_age_days(),
            retention_days: default_emergency_retention_days(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_temp_max_age_hours() -> u64 {
    24
}

fn default_log_max_age_days() -> u64 {
    2
}

fn default_emergency_retention_days() -> u32 {
    7
}

fn default_step_timeout_secs() -> u64 {
    600
}

impl EmergencyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.retention_days == 0 {
            return Err("emergency.retention_days must be at least 1".into());
        }
        if self.log_max_age_days == 0 {
            return Err("emergency.log_max_age_days must be at least 1".into());
        }
        if self.step_timeout_secs == 0 {
            return Err("emergency.step_timeout_secs must be at least 1".into());
        }
        Ok(())
    }

    pub fn temp_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.temp_max_age_hours as i64)
    }

    pub fn log_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.log_max_age_days as i64)
    }

    pub fn step_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.step_timeout_secs)
    }
}
