use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobType, TriggerSpec};

/// Inclusive bounds enforced on every live policy.
pub const MIN_RETENTION_DAYS: u32 = 1;
pub const MIN_BATCH_SIZE: u32 = 100;
pub const MAX_BATCH_SIZE: u32 = 10_000;
pub const MIN_DISK_THRESHOLD_PERCENT: u8 = 50;
pub const MAX_DISK_THRESHOLD_PERCENT: u8 = 95;

/// Per-job trigger table. A missing entry means the job is not scheduled.
///
/// `EmergencyCleanup` has no entry: it only runs on a latched disk breach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleExpressions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_retention: Option<TriggerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_deep_clean: Option<TriggerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_probe: Option<TriggerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_check: Option<TriggerSpec>,
}

impl ScheduleExpressions {
    pub fn get(&self, job_type: JobType) -> Option<TriggerSpec> {
        match job_type {
            JobType::DailyRetention => self.daily_retention,
            JobType::WeeklyDeepClean => self.weekly_deep_clean,
            JobType::HealthProbe => self.health_probe,
            JobType::DiskCheck => self.disk_check,
            JobType::EmergencyCleanup => None,
        }
    }

    /// Scheduled job types with their triggers, in a stable order.
    pub fn entries(&self) -> impl Iterator<Item = (JobType, TriggerSpec)> + '_ {
        JobType::ALL
            .into_iter()
            .filter_map(|job_type| self.get(job_type).map(|spec| (job_type, spec)))
    }
}

impl ScheduleExpressions {
    /// Daily retention at 02:00, deep clean Sundays at 03:00, health probe
    /// every 5 minutes, disk check every minute.
    pub fn standard() -> Self {
        Self {
            daily_retention: Some(TriggerSpec::Daily { hour: 2, minute: 0 }),
            weekly_deep_clean: Some(TriggerSpec::Weekly {
                weekday: chrono::Weekday::Sun,
                hour: 3,
                minute: 0,
            }),
            health_probe: Some(TriggerSpec::Interval { every_secs: 300 }),
            disk_check: Some(TriggerSpec::Interval { every_secs: 60 }),
        }
    }
}

/// The live retention/threshold/schedule policy.
///
/// Only constructed through settings validation, so the bounds above always
/// hold for an instance obtained from the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub batch_size: u32,
    pub disk_threshold_percent: u8,
    pub notifications_enabled: bool,
    pub schedules: ScheduleExpressions,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            batch_size: 1000,
            disk_threshold_percent: 85,
            notifications_enabled: true,
            schedules: ScheduleExpressions::standard(),
        }
    }
}

impl RetentionPolicy {
    /// Loosen into a candidate, e.g. to edit a single field.
    pub fn to_candidate(&self) -> PolicyCandidate {
        PolicyCandidate {
            retention_days: Some(self.retention_days as i64),
            batch_size: Some(self.batch_size as i64),
            disk_threshold_percent: Some(self.disk_threshold_percent as i64),
            notifications_enabled: Some(self.notifications_enabled),
            schedules: Some(self.schedules.clone()),
        }
    }
}

/// An unvalidated policy as submitted by a caller.
///
/// Every field is optional so that a missing field is reported by name rather
/// than as a generic deserialization error. Numbers are signed so that
/// negative input reaches the bounds check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyCandidate {
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub disk_threshold_percent: Option<i64>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub schedules: Option<ScheduleExpressions>,
}

/// A policy that was live at some point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    /// Monotonic, starting at 1.
    pub version: u64,
    pub policy: RetentionPolicy,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Set when this version was produced by restoring an older one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u64>,
}
