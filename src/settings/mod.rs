//! Live, versioned retention policy.
//!
//! Exactly one [`RetentionPolicy`] is live at a time. Every accepted change
//! goes through validate, persist, append version, swap, broadcast, in that
//! order; a failure at any step leaves the live policy and the version list
//! untouched. Readers take an `Arc` snapshot, so a job that started under one
//! policy finishes under it even if the policy is replaced mid-run.

mod persistence;

use std::{fmt, sync::Arc};

pub use persistence::*;
use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};

use crate::{
    clock::Clock,
    models::{
        MAX_BATCH_SIZE, MAX_DISK_THRESHOLD_PERCENT, MIN_BATCH_SIZE, MIN_DISK_THRESHOLD_PERCENT,
        MIN_RETENTION_DAYS, JobType, PolicyCandidate, PolicyVersion, RetentionPolicy,
    },
    observability::metrics,
};

/// A candidate policy was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending field, dotted for nested fields.
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to persist settings: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("settings version {0} not found")]
    VersionNotFound(u64),
}

/// Check a candidate and build the policy it describes.
///
/// Every field must be present; the first missing or out-of-bounds field is
/// reported.
pub fn validate(candidate: &PolicyCandidate) -> Result<RetentionPolicy, ValidationError> {
    let retention_days = require(candidate.retention_days, "retention_days")?;
    let batch_size = require(candidate.batch_size, "batch_size")?;
    let disk_threshold_percent =
        require(candidate.disk_threshold_percent, "disk_threshold_percent")?;
    let notifications_enabled =
        require(candidate.notifications_enabled, "notifications_enabled")?;
    let schedules = require(candidate.schedules.clone(), "schedules")?;

    if retention_days < MIN_RETENTION_DAYS as i64 || retention_days > u32::MAX as i64 {
        return Err(ValidationError::new(
            "retention_days",
            format!("must be at least {MIN_RETENTION_DAYS}, got {retention_days}"),
        ));
    }
    if !(MIN_BATCH_SIZE as i64..=MAX_BATCH_SIZE as i64).contains(&batch_size) {
        return Err(ValidationError::new(
            "batch_size",
            format!("must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {batch_size}"),
        ));
    }
    if !(MIN_DISK_THRESHOLD_PERCENT as i64..=MAX_DISK_THRESHOLD_PERCENT as i64)
        .contains(&disk_threshold_percent)
    {
        return Err(ValidationError::new(
            "disk_threshold_percent",
            format!(
                "must be between {MIN_DISK_THRESHOLD_PERCENT} and {MAX_DISK_THRESHOLD_PERCENT}, got {disk_threshold_percent}"
            ),
        ));
    }
    for (job_type, spec) in schedules.entries() {
        spec.validate()
            .map_err(|reason| ValidationError::new(format!("schedules.{job_type}"), reason))?;
    }
    if schedules.get(JobType::DiskCheck).is_none() {
        return Err(ValidationError::new(
            "schedules.disk_check",
            "is required; disk pressure is only evaluated on this trigger",
        ));
    }

    Ok(RetentionPolicy {
        retention_days: retention_days as u32,
        batch_size: batch_size as u32,
        disk_threshold_percent: disk_threshold_percent as u8,
        notifications_enabled,
        schedules,
    })
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::new(field, "is required"))
}

/// Who changed the policy and why.
#[derive(Debug, Clone, Default)]
pub struct ChangeNote {
    pub author: Option<String>,
    pub comment: Option<String>,
}

impl ChangeNote {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// The single owner of the live policy.
pub struct SettingsStore {
    live: RwLock<Arc<RetentionPolicy>>,
    versions: RwLock<Vec<PolicyVersion>>,
    /// Serializes writers across the persist step.
    writer: Mutex<()>,
    changes: watch::Sender<Arc<RetentionPolicy>>,
    persistence: Arc<dyn SettingsPersistence>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("live", &*self.live.read())
            .field("versions", &self.versions.read().len())
            .finish()
    }
}

impl SettingsStore {
    /// Load persisted versions, or seed version 1 from `initial`.
    ///
    /// A persisted head always wins over `initial`.
    pub async fn open(
        persistence: Arc<dyn SettingsPersistence>,
        initial: RetentionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SettingsError> {
        let mut versions = persistence.load().await?;

        if versions.is_empty() {
            versions.push(PolicyVersion {
                version: 1,
                policy: initial,
                applied_at: clock.now(),
                author: Some("config".to_string()),
                comment: Some("initial policy".to_string()),
                restored_from: None,
            });
            persistence.save(&versions).await?;
            tracing::info!("Seeded settings store from configuration");
        } else {
            versions.sort_by_key(|v| v.version);
            tracing::info!(
                versions = versions.len(),
                head = versions.last().map(|v| v.version).unwrap_or_default(),
                "Loaded persisted settings"
            );
        }

        let head = versions
            .last()
            .map(|v| Arc::new(v.policy.clone()))
            .unwrap_or_default();
        let (changes, _) = watch::channel(head.clone());

        Ok(Self {
            live: RwLock::new(head),
            versions: RwLock::new(versions),
            writer: Mutex::new(()),
            changes,
            persistence,
            clock,
        })
    }

    /// An in-memory store seeded with `initial`.
    pub async fn in_memory(
        initial: RetentionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SettingsError> {
        Self::open(Arc::new(MemorySettings::default()), initial, clock).await
    }

    /// Snapshot of the live policy.
    pub fn current(&self) -> Arc<RetentionPolicy> {
        self.live.read().clone()
    }

    /// Every version, oldest first.
    pub fn history(&self) -> Vec<PolicyVersion> {
        self.versions.read().clone()
    }

    pub fn head_version(&self) -> u64 {
        self.versions
            .read()
            .last()
            .map(|v| v.version)
            .unwrap_or_default()
    }

    /// Receiver that observes every swap of the live policy.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RetentionPolicy>> {
        self.changes.subscribe()
    }

    /// Validate and install a new policy.
    pub async fn apply(
        &self,
        candidate: &PolicyCandidate,
        note: ChangeNote,
    ) -> Result<PolicyVersion, SettingsError> {
        let policy = validate(candidate).inspect_err(|e| {
            tracing::info!(field = %e.field, reason = %e.reason, "Rejected settings update");
        })?;
        let version = self.commit(policy, note, None).await?;
        metrics::record_settings_change("update", version.version);
        Ok(version)
    }

    /// Re-apply the values of a historical version as a new head.
    ///
    /// The restored version stays in the history unchanged.
    pub async fn restore(
        &self,
        version: u64,
        note: ChangeNote,
    ) -> Result<PolicyVersion, SettingsError> {
        let policy = self
            .versions
            .read()
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.policy.clone())
            .ok_or(SettingsError::VersionNotFound(version))?;

        let restored = self.commit(policy, note, Some(version)).await?;
        metrics::record_settings_change("restore", restored.version);
        Ok(restored)
    }

    async fn commit(
        &self,
        policy: RetentionPolicy,
        note: ChangeNote,
        restored_from: Option<u64>,
    ) -> Result<PolicyVersion, SettingsError> {
        let _writer = self.writer.lock().await;

        let mut next = self.versions.read().clone();
        let version = PolicyVersion {
            version: next.last().map(|v| v.version).unwrap_or_default() + 1,
            policy,
            applied_at: self.clock.now(),
            author: note.author,
            comment: note.comment,
            restored_from,
        };
        next.push(version.clone());

        if let Err(e) = self.persistence.save(&next).await {
            tracing::warn!(error = %e, "Failed to persist settings; live policy unchanged");
            return Err(e.into());
        }

        let policy = Arc::new(version.policy.clone());
        *self.versions.write() = next;
        *self.live.write() = policy.clone();
        self.changes.send_replace(policy);

        tracing::info!(
            version = version.version,
            author = version.author.as_deref().unwrap_or("-"),
            restored_from = ?version.restored_from,
            "Applied settings"
        );

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::{
        clock::ManualClock,
        models::{ScheduleExpressions, TriggerSpec},
    };

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ))
    }

    async fn store() -> SettingsStore {
        SettingsStore::in_memory(RetentionPolicy::default(), clock())
            .await
            .unwrap()
    }

    fn candidate() -> PolicyCandidate {
        RetentionPolicy::default().to_candidate()
    }

    #[rstest]
    #[case::retention_zero(PolicyCandidate { retention_days: Some(0), ..candidate() }, "retention_days")]
    #[case::retention_negative(PolicyCandidate { retention_days: Some(-5), ..candidate() }, "retention_days")]
    #[case::batch_too_small(PolicyCandidate { batch_size: Some(99), ..candidate() }, "batch_size")]
    #[case::batch_too_large(PolicyCandidate { batch_size: Some(10_001), ..candidate() }, "batch_size")]
    #[case::threshold_low(PolicyCandidate { disk_threshold_percent: Some(49), ..candidate() }, "disk_threshold_percent")]
    #[case::threshold_high(PolicyCandidate { disk_threshold_percent: Some(96), ..candidate() }, "disk_threshold_percent")]
    #[case::missing_batch(PolicyCandidate { batch_size: None, ..candidate() }, "batch_size")]
    #[case::missing_schedules(PolicyCandidate { schedules: None, ..candidate() }, "schedules")]
    fn test_validate_rejects(#[case] candidate: PolicyCandidate, #[case] field: &str) {
        let err = validate(&candidate).unwrap_err();
        assert_eq!(err.field, field);
    }

    #[rstest]
    #[case(100, 50)]
    #[case(10_000, 95)]
    fn test_validate_accepts_bounds(#[case] batch_size: i64, #[case] threshold: i64) {
        let policy = validate(&PolicyCandidate {
            batch_size: Some(batch_size),
            disk_threshold_percent: Some(threshold),
            ..candidate()
        })
        .unwrap();
        assert_eq!(policy.batch_size as i64, batch_size);
    }

    #[test]
    fn test_validate_rejects_bad_trigger() {
        let mut schedules = ScheduleExpressions::standard();
        schedules.daily_retention = Some(TriggerSpec::Daily { hour: 25, minute: 0 });
        let err = validate(&PolicyCandidate {
            schedules: Some(schedules),
            ..candidate()
        })
        .unwrap_err();
        assert_eq!(err.field, "schedules.daily_retention");
    }

    #[test]
    fn test_validate_rejects_oversized_interval() {
        let mut schedules = ScheduleExpressions::standard();
        schedules.health_probe = Some(TriggerSpec::Interval { every_secs: 1 << 60 });
        let err = validate(&PolicyCandidate {
            schedules: Some(schedules),
            ..candidate()
        })
        .unwrap_err();
        assert_eq!(err.field, "schedules.health_probe");
    }

    #[test]
    fn test_validate_requires_disk_check() {
        let mut schedules = ScheduleExpressions::standard();
        schedules.disk_check = None;
        let err = validate(&PolicyCandidate {
            schedules: Some(schedules),
            ..candidate()
        })
        .unwrap_err();
        assert_eq!(err.field, "schedules.disk_check");
    }

    #[tokio::test]
    async fn test_open_seeds_version_one() {
        let store = store().await;
        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(*store.current(), RetentionPolicy::default());
    }

    #[tokio::test]
    async fn test_apply_swaps_and_broadcasts() {
        let store = store().await;
        let mut rx = store.subscribe();
        let before = store.current();

        let version = store
            .apply(
                &PolicyCandidate {
                    retention_days: Some(60),
                    ..candidate()
                },
                ChangeNote::new("alice").with_comment("longer window"),
            )
            .await
            .unwrap();

        assert_eq!(version.version, 2);
        assert_eq!(store.current().retention_days, 60);
        // A snapshot taken earlier is unaffected.
        assert_eq!(before.retention_days, 30);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().retention_days, 60);
    }

    #[tokio::test]
    async fn test_rejected_apply_leaves_state_unchanged() {
        let store = store().await;
        let rx = store.subscribe();

        let result = store
            .apply(
                &PolicyCandidate {
                    batch_size: None,
                    ..candidate()
                },
                ChangeNote::default(),
            )
            .await;

        assert!(matches!(result, Err(SettingsError::Validation(e)) if e.field == "batch_size"));
        assert_eq!(*store.current(), RetentionPolicy::default());
        assert_eq!(store.history().len(), 1);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_restore_appends_new_head() {
        let store = store().await;
        store
            .apply(
                &PolicyCandidate {
                    retention_days: Some(90),
                    ..candidate()
                },
                ChangeNote::new("bob"),
            )
            .await
            .unwrap();

        let restored = store.restore(1, ChangeNote::new("carol")).await.unwrap();

        let history = store.history();
        assert_eq!(history.len(), 3);
        assert_eq!(restored.version, 3);
        assert_eq!(restored.restored_from, Some(1));
        assert_eq!(store.current().retention_days, 30);
        // The restored version itself is untouched.
        assert_eq!(history[0].restored_from, None);
        assert_eq!(history[0].author.as_deref(), Some("config"));
    }

    #[tokio::test]
    async fn test_restore_unknown_version() {
        let store = store().await;
        let result = store.restore(42, ChangeNote::default()).await;
        assert!(matches!(result, Err(SettingsError::VersionNotFound(42))));
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_apply() {
        let persistence = Arc::new(MemorySettings::default());
        let store = SettingsStore::open(persistence.clone(), RetentionPolicy::default(), clock())
            .await
            .unwrap();
        persistence.fail_writes(true);

        let result = store
            .apply(
                &PolicyCandidate {
                    retention_days: Some(10),
                    ..candidate()
                },
                ChangeNote::default(),
            )
            .await;

        assert!(matches!(result, Err(SettingsError::Persistence(_))));
        assert_eq!(store.current().retention_days, 30);
        assert_eq!(store.head_version(), 1);
    }

    #[tokio::test]
    async fn test_persisted_head_wins_over_initial() {
        let persistence = Arc::new(MemorySettings::default());
        {
            let store =
                SettingsStore::open(persistence.clone(), RetentionPolicy::default(), clock())
                    .await
                    .unwrap();
            store
                .apply(
                    &PolicyCandidate {
                        retention_days: Some(14),
                        ..candidate()
                    },
                    ChangeNote::default(),
                )
                .await
                .unwrap();
        }

        let reopened = SettingsStore::open(
            persistence,
            RetentionPolicy {
                retention_days: 365,
                ..Default::default()
            },
            clock(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.current().retention_days, 14);
        assert_eq!(reopened.head_version(), 2);
    }
}
