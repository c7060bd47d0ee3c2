use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::models::JobType;

/// Dispatcher configuration.
///
/// ```toml
/// [scheduler]
/// default_timeout_secs = 3600
/// max_idle_secs = 60
///
/// [scheduler.timeouts]
/// health_probe = 30
/// disk_check = 15
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Timeout applied to a job invocation with no override.
    /// Default: 3600 (1 hour)
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Per-job-type timeout overrides, in seconds.
    #[serde(default)]
    pub timeouts: JobTimeouts,

    /// Upper bound on how long the loop sleeps between ticks.
    /// Default: 60
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// How long shutdown waits for in-flight jobs.
    /// Default: 30
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            timeouts: JobTimeouts::default(),
            max_idle_secs: default_max_idle_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_max_idle_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl SchedulerConfig {
    pub fn timeout_for(&self, job_type: JobType) -> Duration {
        let secs = self
            .timeouts
            .get(job_type)
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout_secs == 0 {
            return Err("scheduler.default_timeout_secs must be at least 1".into());
        }
        if let Some(job_type) = JobType::ALL
            .into_iter()
            .find(|t| self.timeouts.get(*t) == Some(0))
        {
            return Err(format!("scheduler.timeouts.{job_type} must be at least 1"));
        }
        if self.max_idle_secs == 0 {
            return Err("scheduler.max_idle_secs must be at least 1".into());
        }
        Ok(())
    }
}

/// Timeout overrides keyed by job type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobTimeouts {
    #[serde(default)]
    pub daily_retention: Option<u64>,
    #[serde(default)]
    pub weekly_deep_clean: Option<u64>,
    #[serde(default)]
    pub health_probe: Option<u64>,
    #[serde(default)]
    pub disk_check: Option<u64>,
    #[serde(default)]
    pub emergency_cleanup: Option<u64>,
}

impl JobTimeouts {
    pub fn get(&self, job_type: JobType) -> Option<u64> {
        match job_type {
            JobType::DailyRetention => self.daily_retention,
            JobType::WeeklyDeepClean => self.weekly_deep_clean,
            JobType::HealthProbe => self.health_probe,
            JobType::DiskCheck => self.disk_check,
            JobType::EmergencyCleanup => self.emergency_cleanup,
        }
    }
}

/// Run history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Oldest runs are evicted past this many entries.
    /// Default: 5000
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_runs: default_max_runs(),
        }
    }
}

fn default_max_runs() -> usize {
    5000
}

/// Where the versioned policy is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    /// JSON file holding every policy version. When omitted the policy lives
    /// in memory and is rebuilt from `[policy]` on every start.
    #[serde(default)]
    pub path: Option<PathBuf>,
}
