//! Configuration module for the maintenance engine.
//!
//! The engine is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [policy]
//! retention_days = 30
//! batch_size = 1000
//! disk_threshold_percent = 85
//!
//! [store]
//! type = "sqlite"
//! url = "sqlite://${DATA_DIR}/app.db"
//! table = "events"
//! ```

mod monitor;
mod notifications;
mod observability;
mod retention;
mod scheduler;

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

pub use monitor::*;
pub use notifications::*;
pub use observability::*;
pub use retention::*;
pub use scheduler::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{JobType, PolicyCandidate, RetentionPolicy};

/// Root configuration for the engine.
///
/// Every section is optional; an empty file runs the standard schedules
/// against an in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Initial policy. Fields left out take the built-in defaults. Once a
    /// policy has been persisted through the settings store, the persisted
    /// head wins over this section.
    #[serde(default)]
    pub policy: PolicyCandidate,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Records subject to retention.
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub emergency: EmergencyConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub settings: SettingsConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Feature-gated values get an actionable message instead of serde's
        // "unknown variant".
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: EngineConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.initial_policy()?;

        for result in [
            self.scheduler.validate(),
            self.store.validate(),
            self.monitor.validate(),
            self.emergency.validate(),
            self.notifications.validate(),
        ] {
            result.map_err(ConfigError::Validation)?;
        }

        // Three bounded steps must finish before the scheduler aborts the
        // emergency run, or its closing alert is lost.
        let cascade = self.emergency.step_timeout() * 3;
        let emergency_timeout = self.scheduler.timeout_for(JobType::EmergencyCleanup);
        if cascade >= emergency_timeout {
            return Err(ConfigError::Validation(format!(
                "emergency.step_timeout_secs ({}s per step, 3 steps) must leave room \
                 within the emergency_cleanup timeout ({}s)",
                self.emergency.step_timeout_secs,
                emergency_timeout.as_secs()
            )));
        }

        if self.archive.target_batch_secs == 0 {
            return Err(ConfigError::Validation(
                "archive.target_batch_secs must be at least 1".into(),
            ));
        }

        if self.history.max_runs == 0 {
            return Err(ConfigError::Validation(
                "history.max_runs must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// The `[policy]` section completed with defaults and validated.
    pub fn initial_policy(&self) -> Result<RetentionPolicy, ConfigError> {
        let defaults = RetentionPolicy::default().to_candidate();
        let candidate = PolicyCandidate {
            retention_days: self.policy.retention_days.or(defaults.retention_days),
            batch_size: self.policy.batch_size.or(defaults.batch_size),
            disk_threshold_percent: self
                .policy
                .disk_threshold_percent
                .or(defaults.disk_threshold_percent),
            notifications_enabled: self
                .policy
                .notifications_enabled
                .or(defaults.notifications_enabled),
            schedules: self.policy.schedules.clone().or(defaults.schedules),
        };
        crate::settings::validate(&candidate)
            .map_err(|e| ConfigError::Validation(format!("policy.{e}")))
    }
}

/// `$XDG_CONFIG_HOME/vigil/vigil.toml` (or the platform equivalent).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
        .join("vigil.toml")
}

/// Starter configuration written by `vigil init`.
pub const EXAMPLE_CONFIG: &str = r#"# vigil configuration

[policy]
retention_days = 30
batch_size = 1000
disk_threshold_percent = 85
notifications_enabled = true

[policy.schedules.daily_retention]
kind = "daily"
hour = 2

[policy.schedules.weekly_deep_clean]
kind = "weekly"
weekday = "Sun"
hour = 3

[policy.schedules.health_probe]
kind = "interval"
every_secs = 300

[policy.schedules.disk_check]
kind = "interval"
every_secs = 60

[store]
type = "memory"
# type = "sqlite"
# url = "sqlite://${DATA_DIR}/app.db"
# table = "events"
# timestamp_column = "created_at"

[backup]
dir = "backups"

[monitor]
path = "/"

[emergency]
temp_dirs = []
log_dirs = []
step_timeout_secs = 600

[notifications]
notify_on_failure = true
# [notifications.webhook]
# url = "https://alerts.example.com/hooks/vigil"

[observability.logging]
level = "info"
format = "compact"
"#;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(store_type) = raw
        .get("store")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_store_feature(store_type, &mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let mut features: Vec<&str> = issues.iter().map(|(_, f)| *f).collect();
    features.sort_unstable();
    features.dedup();

    let messages: Vec<String> = issues.into_iter().map(|(m, _)| m).collect();
    Err(ConfigError::Validation(format!(
        "{}\n\nRebuild with: cargo build --features {}",
        messages.join("\n"),
        features.join(",")
    )))
}

fn check_store_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "database-sqlite"))]
        "sqlite" => _issues.push((
            "store type 'sqlite' requires the 'database-sqlite' feature".into(),
            "database-sqlite",
        )),
        _ => {}
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = &*ENV_VAR_REGEX;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

static ENV_VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());
