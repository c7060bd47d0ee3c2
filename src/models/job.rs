use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of maintenance work the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Scheduled retention sweep with the live retention window.
    DailyRetention,
    /// Retention sweep with storage compaction plus temp-file purge.
    WeeklyDeepClean,
    /// Store/volume reachability check.
    HealthProbe,
    /// Disk pressure sample and latch evaluation.
    DiskCheck,
    /// Degraded-mode cascade run on a latched disk breach.
    EmergencyCleanup,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::DailyRetention,
        JobType::WeeklyDeepClean,
        JobType::HealthProbe,
        JobType::DiskCheck,
        JobType::EmergencyCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DailyRetention => "daily_retention",
            JobType::WeeklyDeepClean => "weekly_deep_clean",
            JobType::HealthProbe => "health_probe",
            JobType::DiskCheck => "disk_check",
            JobType::EmergencyCleanup => "emergency_cleanup",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Fired from the trigger table.
    Scheduled,
    /// Invoked through an engine operation.
    Manual,
    /// Dispatched by the disk monitor after a latched breach.
    Breach,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
            RunTrigger::Breach => "breach",
        }
    }
}

/// Point-in-time measurements attached to a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Wall time of the run.
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_used_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    /// Alert sent on behalf of this run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<Uuid>,
    /// Job-specific counters (files removed, bytes freed, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, f64>,
}

impl MetricsSnapshot {
    pub fn with_detail(mut self, key: impl Into<String>, value: f64) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// What a handler reports back when it returns normally.
///
/// A handler that ran to completion but hit recoverable failures returns
/// `Ok` with a non-empty `errors` list; the run is then recorded as failed.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub archived_count: u64,
    pub errors: Vec<String>,
    pub metrics: MetricsSnapshot,
}

impl JobOutcome {
    pub fn archived(count: u64) -> Self {
        Self {
            archived_count: count,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A finished, immutable record of one job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceJobRun {
    pub id: Uuid,
    pub job_type: JobType,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub archived_count: u64,
    pub errors: Vec<String>,
    pub metrics: MetricsSnapshot,
}

impl MaintenanceJobRun {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// An in-progress run. Created when a job starts and consumed by
/// [`RunRecorder::finish`], so a finished run can never be mutated again.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    id: Uuid,
    job_type: JobType,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
}

impl RunRecorder {
    pub fn start(job_type: JobType, trigger: RunTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            trigger,
            started_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn trigger(&self) -> RunTrigger {
        self.trigger
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seal the run from a handler result.
    ///
    /// `Err` carries the failure message plus whatever partial archive count
    /// the handler managed before failing.
    pub fn finish(
        self,
        finished_at: DateTime<Utc>,
        result: Result<JobOutcome, (String, u64)>,
    ) -> MaintenanceJobRun {
        let (archived_count, errors, mut metrics) = match result {
            Ok(outcome) => (outcome.archived_count, outcome.errors, outcome.metrics),
            Err((message, archived)) => (archived, vec![message], MetricsSnapshot::default()),
        };
        metrics.duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        MaintenanceJobRun {
            id: self.id,
            job_type: self.job_type,
            trigger: self.trigger,
            started_at: self.started_at,
            finished_at,
            success: errors.is_empty(),
            archived_count,
            errors,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_job_type_serializes_snake_case() {
        let json = serde_json::to_string(&JobType::WeeklyDeepClean).unwrap();
        assert_eq!(json, "\"weekly_deep_clean\"");
        assert_eq!(JobType::EmergencyCleanup.to_string(), "emergency_cleanup");
    }

    #[test]
    fn test_finish_clean_outcome_is_success() {
        let recorder = RunRecorder::start(JobType::DailyRetention, RunTrigger::Scheduled, t0());
        let id = recorder.id();
        let run = recorder.finish(t0() + Duration::seconds(3), Ok(JobOutcome::archived(12)));

        assert_eq!(run.id, id);
        assert!(run.success);
        assert_eq!(run.archived_count, 12);
        assert_eq!(run.metrics.duration_ms, 3000);
        assert_eq!(run.duration_ms(), 3000);
    }

    #[test]
    fn test_finish_outcome_with_errors_is_failure() {
        let recorder = RunRecorder::start(JobType::EmergencyCleanup, RunTrigger::Breach, t0());
        let outcome = JobOutcome {
            archived_count: 4,
            errors: vec!["archive: store unreachable".into()],
            metrics: MetricsSnapshot::default(),
        };
        let run = recorder.finish(t0(), Ok(outcome));
        assert!(!run.success);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.archived_count, 4);
    }

    #[test]
    fn test_finish_error_keeps_partial_count() {
        let recorder = RunRecorder::start(JobType::DailyRetention, RunTrigger::Manual, t0());
        let run = recorder.finish(t0(), Err(("delete failed".into(), 300)));
        assert!(!run.success);
        assert_eq!(run.archived_count, 300);
        assert_eq!(run.errors, vec!["delete failed".to_string()]);
    }
}
