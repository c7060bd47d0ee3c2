//! Emergency remediation cascade.
//!
//! Runs when disk pressure latches. Each step is isolated and bounded by the
//! configured step timeout: a failing or overrunning step is recorded and the
//! next one still runs. The closing alert is sent no matter how the earlier
//! steps went.

mod prune;

use std::{fmt, sync::Arc, time::Duration};

pub use prune::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    archive::{ArchiveMode, Archiver},
    clock::Clock,
    config::EmergencyConfig,
    disk::BreachEvent,
    models::{Alert, AlertDraft, AlertSeverity, RetentionPolicy},
    notify::Notifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStep {
    TempPurge,
    Archive,
    LogPrune,
}

impl fmt::Display for RemediationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemediationStep::TempPurge => "temp_purge",
            RemediationStep::Archive => "archive",
            RemediationStep::LogPrune => "log_prune",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: RemediationStep,
    pub succeeded: bool,
    pub detail: String,
}

/// Everything one cascade did.
#[derive(Debug, Clone)]
pub struct RemediationReport {
    pub steps: Vec<StepResult>,
    pub files_removed: u64,
    pub bytes_freed: u64,
    pub archived: u64,
    /// One entry per failed step, prefixed with the step name.
    pub errors: Vec<String>,
    pub alert: Alert,
}

impl RemediationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Remediator {
    archiver: Arc<Archiver>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    config: EmergencyConfig,
}

impl Remediator {
    pub fn new(
        archiver: Arc<Archiver>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        config: EmergencyConfig,
    ) -> Self {
        Self {
            archiver,
            notifier,
            clock,
            config,
        }
    }

    /// Archive window for the emergency pass under `policy`.
    pub fn retention_days(&self, policy: &RetentionPolicy) -> u32 {
        policy.retention_days.min(self.config.retention_days)
    }

    /// Purge stale temp files. Also used by the weekly deep clean.
    pub async fn purge_temp(&self) -> Result<PruneReport, tokio::task::JoinError> {
        prune_older_than(
            self.config.temp_dirs.clone(),
            self.config.temp_max_age(),
            self.clock.now(),
        )
        .await
    }

    async fn prune_logs(&self) -> Result<PruneReport, tokio::task::JoinError> {
        prune_older_than(
            self.config.log_dirs.clone(),
            self.config.log_max_age(),
            self.clock.now(),
        )
        .await
    }

    /// Run the full cascade for `run_id` with the run's policy snapshot.
    pub async fn remediate(
        &self,
        run_id: Uuid,
        policy: &RetentionPolicy,
        breach: Option<&BreachEvent>,
    ) -> RemediationReport {
        let mut steps = Vec::with_capacity(3);
        let mut errors = Vec::new();
        let mut files_removed = 0;
        let mut bytes_freed = 0;

        tracing::warn!(
            %run_id,
            used_percent = breach.map(|b| b.sample.used_percent),
            threshold_percent = breach.map(|b| b.threshold_percent),
            "Starting emergency remediation"
        );

        let limit = self.config.step_timeout();

        let temp = bounded(limit, self.purge_temp()).await;
        record_prune(
            RemediationStep::TempPurge,
            temp,
            &mut steps,
            &mut errors,
            &mut files_removed,
            &mut bytes_freed,
        );

        let days = self.retention_days(policy);
        let archive = self
            .archiver
            .archive(days, ArchiveMode::Aggressive, policy.batch_size);
        let archived = match tokio::time::timeout(limit, archive).await {
            Ok(Ok(archived)) => {
                steps.push(StepResult {
                    step: RemediationStep::Archive,
                    succeeded: true,
                    detail: format!("archived {archived} records older than {days} days"),
                });
                archived
            }
            Ok(Err(e)) => {
                tracing::error!(%run_id, error = %e, "Emergency archive step failed");
                fail_step(RemediationStep::Archive, e.to_string(), &mut steps, &mut errors);
                e.archived
            }
            Err(_) => {
                tracing::error!(%run_id, timeout_secs = limit.as_secs(), "Emergency archive step timed out");
                fail_step(RemediationStep::Archive, timed_out(limit), &mut steps, &mut errors);
                0
            }
        };

        let logs = bounded(limit, self.prune_logs()).await;
        record_prune(
            RemediationStep::LogPrune,
            logs,
            &mut steps,
            &mut errors,
            &mut files_removed,
            &mut bytes_freed,
        );

        let severity = if errors.is_empty() {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Critical
        };
        let subject = if errors.is_empty() {
            "Emergency cleanup completed".to_string()
        } else {
            format!("Emergency cleanup finished with {} failed step(s)", errors.len())
        };
        let alert = self
            .notifier
            .send(AlertDraft::new(severity, subject, alert_body(breach, &steps)).for_run(run_id))
            .await;

        tracing::warn!(
            %run_id,
            archived,
            files_removed,
            bytes_freed,
            failed_steps = errors.len(),
            alert_delivered = alert.delivered(),
            "Emergency remediation finished"
        );

        RemediationReport {
            steps,
            files_removed,
            bytes_freed,
            archived,
            errors,
            alert,
        }
    }
}

fn timed_out(limit: Duration) -> String {
    format!("timed out after {}s", limit.as_secs())
}

/// Await `step` for at most `limit`.
async fn bounded<T, E: fmt::Display>(
    limit: Duration,
    step: impl Future<Output = Result<T, E>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, step).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(timed_out(limit)),
    }
}

fn fail_step(
    step: RemediationStep,
    detail: String,
    steps: &mut Vec<StepResult>,
    errors: &mut Vec<String>,
) {
    errors.push(format!("{step}: {detail}"));
    steps.push(StepResult {
        step,
        succeeded: false,
        detail,
    });
}

fn record_prune(
    step: RemediationStep,
    result: Result<PruneReport, String>,
    steps: &mut Vec<StepResult>,
    errors: &mut Vec<String>,
    files_removed: &mut u64,
    bytes_freed: &mut u64,
) {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(%step, error = %e, "Pruning step failed");
            fail_step(step, e, steps, errors);
            return;
        }
    };

    *files_removed += report.files_removed;
    *bytes_freed += report.bytes_freed;

    let mut detail = format!(
        "removed {} files, freed {} bytes",
        report.files_removed, report.bytes_freed
    );
    let succeeded = match report.error_summary() {
        Some(summary) => {
            tracing::warn!(%step, failures = report.errors.len(), "Some files could not be removed");
            errors.push(format!("{step}: {summary}"));
            detail.push_str(&format!("; failures: {summary}"));
            false
        }
        None => true,
    };
    steps.push(StepResult {
        step,
        succeeded,
        detail,
    });
}

fn alert_body(breach: Option<&BreachEvent>, steps: &[StepResult]) -> String {
    let mut body = match breach {
        Some(b) => format!(
            "Disk usage {:.1}% exceeded the {}% threshold ({} of {} bytes used).\n",
            b.sample.used_percent, b.threshold_percent, b.sample.used_bytes, b.sample.total_bytes
        ),
        None => String::from("Emergency cleanup run.\n"),
    };
    for step in steps {
        let status = if step.succeeded { "ok" } else { "FAILED" };
        body.push_str(&format!("- {}: {status} ({})\n", step.step, step.detail));
    }
    body
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use filetime::FileTime;

    use super::*;
    use crate::{
        archive::{
            BatchOptimizer, MemoryRecordStore, NullBackupSink, RecordStore, StoreError,
            StoreResult, StoredRecord,
        },
        clock::ManualClock,
        models::DiskSample,
        notify::{AlertChannel, DeliveryError, LogChannel},
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 6, 0, 0).unwrap()
    }

    fn aged_file(path: &Path, age: Duration) {
        fs::write(path, b"0123456789").unwrap();
        let mtime = FileTime::from_unix_time((now() - age).timestamp(), 0);
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    fn breach() -> BreachEvent {
        BreachEvent {
            sample: DiskSample::new(now(), 92, 100),
            threshold_percent: 85,
        }
    }

    struct Fixture {
        remediator: Remediator,
        notifier: Arc<Notifier>,
        _temp: tempfile::TempDir,
        _logs: tempfile::TempDir,
    }

    fn fixture(store: Arc<dyn RecordStore>, channel: Arc<dyn AlertChannel>) -> Fixture {
        fixture_with(store, channel, EmergencyConfig::default())
    }

    fn fixture_with(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn AlertChannel>,
        config: EmergencyConfig,
    ) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
        let temp = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        aged_file(&temp.path().join("stale.tmp"), Duration::hours(48));
        aged_file(&temp.path().join("fresh.tmp"), Duration::hours(2));
        aged_file(&logs.path().join("app.log.1"), Duration::days(5));
        aged_file(&logs.path().join("app.log"), Duration::hours(1));

        let archiver = Arc::new(Archiver::new(
            store,
            Arc::new(NullBackupSink),
            clock.clone(),
            BatchOptimizer::new(std::time::Duration::from_secs(300), 80.0),
        ));
        let notifier = Arc::new(Notifier::new(channel, clock.clone(), 10));
        let config = EmergencyConfig {
            temp_dirs: vec![temp.path().to_path_buf()],
            log_dirs: vec![logs.path().to_path_buf()],
            ..config
        };
        Fixture {
            remediator: Remediator::new(archiver, notifier.clone(), clock, config),
            notifier,
            _temp: temp,
            _logs: logs,
        }
    }

    fn seeded_store() -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        for (id, age) in [(1, 2), (2, 8), (3, 10), (4, 40)] {
            store.insert_at(id, now() - Duration::days(age));
        }
        store
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn fetch_before(
            &self,
            _cutoff: DateTime<Utc>,
            _limit: u32,
            _ordered: bool,
        ) -> StoreResult<Vec<StoredRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _ids: &[i64]) -> StoreResult<u64> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn compact(&self) -> StoreResult<()> {
            Ok(())
        }

        async fn count(&self) -> StoreResult<u64> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// Never answers.
    struct HangingStore;

    #[async_trait]
    impl RecordStore for HangingStore {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn fetch_before(
            &self,
            _cutoff: DateTime<Utc>,
            _limit: u32,
            _ordered: bool,
        ) -> StoreResult<Vec<StoredRecord>> {
            std::future::pending().await
        }

        async fn delete(&self, _ids: &[i64]) -> StoreResult<u64> {
            std::future::pending().await
        }

        async fn compact(&self) -> StoreResult<()> {
            Ok(())
        }

        async fn count(&self) -> StoreResult<u64> {
            std::future::pending().await
        }
    }

    struct DownChannel;

    #[async_trait]
    impl AlertChannel for DownChannel {
        fn name(&self) -> &str {
            "down"
        }

        async fn deliver(&self, _alert: &Alert) -> Result<(), DeliveryError> {
            Err(DeliveryError::Timeout(5))
        }
    }

    #[tokio::test]
    async fn test_clean_cascade_sends_warning() {
        let store = seeded_store();
        let f = fixture(store.clone(), Arc::new(LogChannel));
        let run_id = Uuid::new_v4();

        let report = f
            .remediator
            .remediate(run_id, &RetentionPolicy::default(), Some(&breach()))
            .await;

        assert!(report.is_clean());
        // Window is min(30, 7): records aged 8, 10 and 40 days go.
        assert_eq!(report.archived, 3);
        assert_eq!(store.ids(), vec![1]);
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.bytes_freed, 20);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.alert.severity, AlertSeverity::Warning);
        assert_eq!(report.alert.triggered_by_run_id, Some(run_id));
        assert!(report.alert.body.contains("92.0%"));
        assert_eq!(f.notifier.recent_alerts(5).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_archive_does_not_stop_cascade() {
        let f = fixture(Arc::new(BrokenStore), Arc::new(LogChannel));

        let report = f
            .remediator
            .remediate(Uuid::new_v4(), &RetentionPolicy::default(), Some(&breach()))
            .await;

        assert!(!report.is_clean());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("archive:"));
        // Log pruning still ran after the failed archive step.
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.alert.severity, AlertSeverity::Critical);
        assert!(report.alert.body.contains("archive: FAILED"));
    }

    #[tokio::test]
    async fn test_hanging_step_times_out_and_alert_still_sent() {
        let f = fixture_with(
            Arc::new(HangingStore),
            Arc::new(LogChannel),
            EmergencyConfig {
                step_timeout_secs: 1,
                ..Default::default()
            },
        );
        let run_id = Uuid::new_v4();

        let report = f
            .remediator
            .remediate(run_id, &RetentionPolicy::default(), Some(&breach()))
            .await;

        assert_eq!(report.errors, vec!["archive: timed out after 1s".to_string()]);
        assert_eq!(report.archived, 0);
        // The steps either side of the stuck archive still ran.
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.alert.severity, AlertSeverity::Critical);
        assert_eq!(report.alert.triggered_by_run_id, Some(run_id));
        assert_eq!(f.notifier.recent_alerts(5).len(), 1);
    }

    #[tokio::test]
    async fn test_alert_sent_even_when_delivery_fails() {
        let f = fixture(seeded_store(), Arc::new(DownChannel));

        let report = f
            .remediator
            .remediate(Uuid::new_v4(), &RetentionPolicy::default(), None)
            .await;

        assert!(report.is_clean());
        assert!(!report.alert.delivered());
        assert_eq!(f.notifier.recent_alerts(5).len(), 1);
    }

    #[tokio::test]
    async fn test_window_uses_shorter_policy() {
        let f = fixture(seeded_store(), Arc::new(LogChannel));
        let policy = RetentionPolicy {
            retention_days: 3,
            ..RetentionPolicy::default()
        };
        assert_eq!(f.remediator.retention_days(&policy), 3);
        assert_eq!(f.remediator.retention_days(&RetentionPolicy::default()), 7);
    }
}
