//! Job scheduler.
//!
//! Holds the trigger table (job type to trigger spec and next fire time) and
//! the handler table, and dispatches runs as tracked tokio tasks.
//!
//! At most one run per job type is in flight. A dispatch for a job type that
//! is already running is dropped, never queued. Every run, however it ends
//! (success, handler error, panic, timeout), is sealed into a
//! [`MaintenanceJobRun`] and appended to the run history.

mod handler;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
pub use handler::*;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinError,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::SchedulerConfig,
    disk::BreachEvent,
    history::RunHistory,
    models::{JobType, MaintenanceJobRun, RunRecorder, RunTrigger, ScheduleExpressions, TriggerSpec},
    observability::metrics,
    settings::SettingsStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} is already running")]
    AlreadyRunning(JobType),

    #[error("no handler registered for {0}")]
    NoHandler(JobType),
}

/// A dispatched run. Await [`JobHandle::wait`] for its sealed record.
#[derive(Debug)]
pub struct JobHandle {
    pub run_id: Uuid,
    pub job_type: JobType,
    result: oneshot::Receiver<MaintenanceJobRun>,
}

impl JobHandle {
    /// The finished run, or `None` if the runtime dropped the task first.
    pub async fn wait(self) -> Option<MaintenanceJobRun> {
        self.result.await.ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TriggerEntry {
    spec: TriggerSpec,
    next_fire: DateTime<Utc>,
}

struct Inner {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    triggers: Mutex<BTreeMap<JobType, TriggerEntry>>,
    running: Mutex<HashSet<JobType>>,
    settings: Arc<SettingsStore>,
    history: Arc<RunHistory>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    tracker: TaskTracker,
}

/// Releases the job type's slot when dropped.
struct RunGuard {
    inner: Arc<Inner>,
    job_type: JobType,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.lock().remove(&self.job_type);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler whose trigger table starts from the live policy.
    pub fn new(
        handlers: HashMap<JobType, Arc<dyn JobHandler>>,
        settings: Arc<SettingsStore>,
        history: Arc<RunHistory>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let now = clock.now();
        let triggers = settings
            .current()
            .schedules
            .entries()
            .map(|(job_type, spec)| {
                (
                    job_type,
                    TriggerEntry {
                        spec,
                        next_fire: spec.next_after(now),
                    },
                )
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                handlers,
                triggers: Mutex::new(triggers),
                running: Mutex::new(HashSet::new()),
                settings,
                history,
                clock,
                config,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Next fire time of every scheduled job type.
    pub fn next_fire_times(&self) -> BTreeMap<JobType, DateTime<Utc>> {
        self.inner
            .triggers
            .lock()
            .iter()
            .map(|(job_type, entry)| (*job_type, entry.next_fire))
            .collect()
    }

    /// Job types with a run in flight.
    pub fn active_jobs(&self) -> Vec<JobType> {
        let mut active: Vec<JobType> = self.inner.running.lock().iter().copied().collect();
        active.sort();
        active
    }

    pub fn is_running(&self, job_type: JobType) -> bool {
        self.inner.running.lock().contains(&job_type)
    }

    /// Fire every trigger due at `now`. Returns the job types dispatched.
    ///
    /// A due trigger is advanced whether or not its dispatch was skipped.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JobType> {
        let due: Vec<JobType> = {
            let mut triggers = self.inner.triggers.lock();
            triggers
                .iter_mut()
                .filter(|(_, entry)| entry.next_fire <= now)
                .map(|(job_type, entry)| {
                    entry.next_fire = entry.spec.next_after(now);
                    *job_type
                })
                .collect()
        };

        due.into_iter()
            .filter(|job_type| match self.dispatch(*job_type, RunTrigger::Scheduled) {
                Ok(_) => true,
                Err(DispatchError::AlreadyRunning(_)) => false,
                Err(e @ DispatchError::NoHandler(_)) => {
                    tracing::warn!(error = %e, "Scheduled job has no handler");
                    false
                }
            })
            .collect()
    }

    /// Recompute the trigger table from new schedules.
    ///
    /// Unchanged specs keep their next fire time, changed specs recompute
    /// from `now`, removed specs drop out. In-flight runs are not touched.
    pub fn reschedule(&self, schedules: &ScheduleExpressions, now: DateTime<Utc>) {
        let mut triggers = self.inner.triggers.lock();
        let next: BTreeMap<JobType, TriggerEntry> = schedules
            .entries()
            .map(|(job_type, spec)| {
                let entry = match triggers.get(&job_type) {
                    Some(existing) if existing.spec == spec => *existing,
                    _ => {
                        tracing::info!(job_type = %job_type, ?spec, "Trigger rescheduled");
                        TriggerEntry {
                            spec,
                            next_fire: spec.next_after(now),
                        }
                    }
                };
                (job_type, entry)
            })
            .collect();

        for removed in triggers.keys().filter(|k| !next.contains_key(*k)) {
            tracing::info!(job_type = %removed, "Trigger removed");
        }
        *triggers = next;
    }

    /// Dispatch the registered handler for `job_type`.
    pub fn dispatch(
        &self,
        job_type: JobType,
        trigger: RunTrigger,
    ) -> Result<JobHandle, DispatchError> {
        let handler = self
            .inner
            .handlers
            .get(&job_type)
            .cloned()
            .ok_or(DispatchError::NoHandler(job_type))?;
        self.spawn(job_type, trigger, handler, None)
    }

    /// Dispatch a one-off handler under `job_type`'s guard, timeout and
    /// history.
    pub fn dispatch_with(
        &self,
        job_type: JobType,
        trigger: RunTrigger,
        handler: Arc<dyn JobHandler>,
    ) -> Result<JobHandle, DispatchError> {
        self.spawn(job_type, trigger, handler, None)
    }

    /// Dispatch the emergency handler for a latched breach.
    pub fn dispatch_breach(&self, event: BreachEvent) -> Result<JobHandle, DispatchError> {
        let job_type = JobType::EmergencyCleanup;
        let handler = self
            .inner
            .handlers
            .get(&job_type)
            .cloned()
            .ok_or(DispatchError::NoHandler(job_type))?;
        self.spawn(job_type, RunTrigger::Breach, handler, Some(event))
    }

    fn claim(&self, job_type: JobType) -> Option<RunGuard> {
        if !self.inner.running.lock().insert(job_type) {
            return None;
        }
        Some(RunGuard {
            inner: self.inner.clone(),
            job_type,
        })
    }

    fn spawn(
        &self,
        job_type: JobType,
        trigger: RunTrigger,
        handler: Arc<dyn JobHandler>,
        breach: Option<BreachEvent>,
    ) -> Result<JobHandle, DispatchError> {
        let Some(guard) = self.claim(job_type) else {
            tracing::debug!(job_type = %job_type, trigger = trigger.as_str(), "Job already running, skipping dispatch");
            metrics::record_job_skipped(job_type.as_str());
            return Err(DispatchError::AlreadyRunning(job_type));
        };

        let recorder = RunRecorder::start(job_type, trigger, self.inner.clock.now());
        let run_id = recorder.id();
        let ctx = JobContext {
            run_id,
            job_type,
            trigger,
            started_at: recorder.started_at(),
            policy: self.inner.settings.current(),
            breach,
        };
        let timeout = self.inner.config.timeout_for(job_type);
        let inner = self.inner.clone();
        let (tx, rx) = oneshot::channel();

        tracing::info!(%run_id, job_type = %job_type, trigger = trigger.as_str(), "Job started");

        self.inner.tracker.spawn(async move {
            let mut task = tokio::spawn(async move { handler.run(ctx).await });

            let result = match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(Ok(outcome))) => Ok(outcome),
                Ok(Ok(Err(e))) => Err((e.to_string(), e.archived())),
                Ok(Err(join)) => Err((join_failure(join), 0)),
                Err(_) => {
                    task.abort();
                    Err((format!("timed out after {}s", timeout.as_secs()), 0))
                }
            };

            let run = recorder.finish(inner.clock.now(), result);
            log_run(&run);
            metrics::record_job_run(
                run.job_type.as_str(),
                run.trigger.as_str(),
                run.success,
                run.duration_ms() as f64 / 1000.0,
            );
            inner.history.append(run.clone());

            drop(guard);
            let _ = tx.send(run);
        });

        Ok(JobHandle {
            run_id,
            job_type,
            result: rx,
        })
    }

    /// Drive the trigger table until `shutdown` is cancelled.
    ///
    /// Sleeps until the next fire time (capped at the configured idle limit),
    /// waking early for settings changes and breach events. On shutdown,
    /// waits up to the grace period for in-flight runs.
    pub async fn run(&self, mut breaches: mpsc::Receiver<BreachEvent>, shutdown: CancellationToken) {
        let mut changes = self.inner.settings.subscribe();
        let mut settings_open = true;
        let max_idle = self.inner.config.max_idle();

        // Catch up with any policy applied between construction and now.
        let policy = changes.borrow_and_update().clone();
        self.reschedule(&policy.schedules, self.inner.clock.now());

        tracing::info!(
            triggers = self.inner.triggers.lock().len(),
            max_idle_secs = max_idle.as_secs(),
            "Scheduler started"
        );

        loop {
            let now = self.inner.clock.now();
            self.tick(now);
            let sleep_for = self.until_next_fire(now).min(max_idle);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = changes.changed(), if settings_open => {
                    if changed.is_err() {
                        settings_open = false;
                        continue;
                    }
                    let policy = changes.borrow_and_update().clone();
                    self.reschedule(&policy.schedules, self.inner.clock.now());
                }
                Some(event) = breaches.recv() => {
                    if let Err(e) = self.dispatch_breach(event) {
                        tracing::warn!(error = %e, "Emergency cleanup not dispatched");
                    }
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        self.shutdown().await;
    }

    fn until_next_fire(&self, now: DateTime<Utc>) -> Duration {
        self.inner
            .triggers
            .lock()
            .values()
            .map(|entry| entry.next_fire)
            .min()
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Stop accepting work and wait up to the grace period for in-flight
    /// runs. Returns whether every run finished in time.
    pub async fn shutdown(&self) -> bool {
        let grace = self.inner.config.shutdown_grace();
        self.inner.tracker.close();
        let active = self.active_jobs();
        if !active.is_empty() {
            tracing::info!(?active, grace_secs = grace.as_secs(), "Waiting for in-flight jobs");
        }

        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("Scheduler stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    active = ?self.active_jobs(),
                    "Shutdown grace period elapsed with jobs still running"
                );
                false
            }
        }
    }
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("handler cancelled: {e}");
    }
    let panic = e.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {message}")
}

fn log_run(run: &MaintenanceJobRun) {
    if run.success {
        tracing::info!(
            run_id = %run.id,
            job_type = %run.job_type,
            archived = run.archived_count,
            duration_ms = run.duration_ms(),
            "Job finished"
        );
    } else {
        tracing::error!(
            run_id = %run.id,
            job_type = %run.job_type,
            archived = run.archived_count,
            duration_ms = run.duration_ms(),
            errors = ?run.errors,
            "Job failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        archive::{ArchiveError, ArchiveStage},
        clock::ManualClock,
        config::JobTimeouts,
        models::{DiskSample, JobOutcome, PolicyCandidate, RetentionPolicy},
        settings::ChangeNote,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(JobOutcome::archived(1))
        }
    }

    /// Blocks until released.
    #[derive(Default)]
    struct Gate {
        release: Notify,
    }

    #[async_trait]
    impl JobHandler for Gate {
        async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
            self.release.notified().await;
            Ok(JobOutcome::default())
        }
    }

    struct Sleeper;

    #[async_trait]
    impl JobHandler for Sleeper {
        async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(JobOutcome::default())
        }
    }

    struct Panicker;

    #[async_trait]
    impl JobHandler for Panicker {
        async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
            panic!("boom");
        }
    }

    struct PartialArchive;

    #[async_trait]
    impl JobHandler for PartialArchive {
        async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
            Err(JobError::Archive(ArchiveError {
                archived: 300,
                stage: ArchiveStage::Delete,
                source: Box::new(std::io::Error::other("locked")),
            }))
        }
    }

    /// Records the breach and policy it was handed.
    #[derive(Default)]
    struct Inspect {
        seen: parking_lot::Mutex<Vec<JobContext>>,
    }

    #[async_trait]
    impl JobHandler for Inspect {
        async fn run(&self, ctx: JobContext) -> Result<JobOutcome, JobError> {
            self.seen.lock().push(ctx);
            Ok(JobOutcome::default())
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        settings: Arc<SettingsStore>,
        history: Arc<RunHistory>,
        clock: ManualClock,
    }

    async fn fixture(
        handlers: Vec<(JobType, Arc<dyn JobHandler>)>,
        config: SchedulerConfig,
    ) -> Fixture {
        let clock = ManualClock::new(t0());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let settings = Arc::new(
            SettingsStore::in_memory(RetentionPolicy::default(), shared.clone())
                .await
                .unwrap(),
        );
        let history = Arc::new(RunHistory::new(100));
        let scheduler = Scheduler::new(
            handlers.into_iter().collect(),
            settings.clone(),
            history.clone(),
            shared,
            config,
        );
        Fixture {
            scheduler,
            settings,
            history,
            clock,
        }
    }

    #[tokio::test]
    async fn test_tick_fires_due_triggers_and_advances() {
        let counting = Arc::new(Counting::default());
        let f = fixture(
            vec![(JobType::DiskCheck, counting.clone() as Arc<dyn JobHandler>)],
            SchedulerConfig::default(),
        )
        .await;

        // Standard schedule: disk check every 60s from t0.
        assert_eq!(
            f.scheduler.next_fire_times()[&JobType::DiskCheck],
            t0() + ChronoDuration::seconds(60)
        );
        assert!(f.scheduler.tick(t0()).is_empty());

        let now = t0() + ChronoDuration::seconds(60);
        assert_eq!(f.scheduler.tick(now), vec![JobType::DiskCheck]);
        assert_eq!(
            f.scheduler.next_fire_times()[&JobType::DiskCheck],
            now + ChronoDuration::seconds(60)
        );

        f.scheduler.shutdown().await;
        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
        assert_eq!(f.history.len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_dispatch_is_dropped() {
        let gate = Arc::new(Gate::default());
        let f = fixture(
            vec![(JobType::DailyRetention, gate.clone() as Arc<dyn JobHandler>)],
            SchedulerConfig::default(),
        )
        .await;

        let first = f
            .scheduler
            .dispatch(JobType::DailyRetention, RunTrigger::Scheduled)
            .unwrap();
        assert_eq!(f.scheduler.active_jobs(), vec![JobType::DailyRetention]);

        let second = f
            .scheduler
            .dispatch(JobType::DailyRetention, RunTrigger::Manual);
        assert_eq!(
            second.unwrap_err(),
            DispatchError::AlreadyRunning(JobType::DailyRetention)
        );

        gate.release.notify_one();
        let run = first.wait().await.unwrap();
        assert!(run.success);
        assert!(f.scheduler.active_jobs().is_empty());
        // Only the first dispatch produced a run.
        assert_eq!(f.history.len(), 1);

        // Guard released: a new dispatch goes through.
        let third = f
            .scheduler
            .dispatch(JobType::DailyRetention, RunTrigger::Manual)
            .unwrap();
        gate.release.notify_one();
        assert_eq!(third.wait().await.unwrap().trigger, RunTrigger::Manual);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_run_and_releases_guard() {
        let config = SchedulerConfig {
            timeouts: JobTimeouts {
                health_probe: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let f = fixture(
            vec![(JobType::HealthProbe, Arc::new(Sleeper) as Arc<dyn JobHandler>)],
            config,
        )
        .await;

        let run = f
            .scheduler
            .dispatch(JobType::HealthProbe, RunTrigger::Scheduled)
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(!run.success);
        assert_eq!(run.errors, vec!["timed out after 5s".to_string()]);
        assert!(!f.scheduler.is_running(JobType::HealthProbe));
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_run() {
        let f = fixture(
            vec![(JobType::HealthProbe, Arc::new(Panicker) as Arc<dyn JobHandler>)],
            SchedulerConfig::default(),
        )
        .await;

        let run = f
            .scheduler
            .dispatch(JobType::HealthProbe, RunTrigger::Scheduled)
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(!run.success);
        assert_eq!(run.errors, vec!["handler panicked: boom".to_string()]);
        assert_eq!(f.history.recent(1)[0].id, run.id);
        assert!(f.scheduler.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_keeps_partial_count() {
        let f = fixture(vec![], SchedulerConfig::default()).await;

        let run = f
            .scheduler
            .dispatch_with(
                JobType::DailyRetention,
                RunTrigger::Manual,
                Arc::new(PartialArchive),
            )
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(!run.success);
        assert_eq!(run.archived_count, 300);
        assert!(run.errors[0].contains("delete"));
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let f = fixture(vec![], SchedulerConfig::default()).await;
        assert_eq!(
            f.scheduler
                .dispatch(JobType::HealthProbe, RunTrigger::Manual)
                .unwrap_err(),
            DispatchError::NoHandler(JobType::HealthProbe)
        );
        // A refused dispatch never claims the slot.
        assert!(f.scheduler.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_keeps_unchanged_fire_times() {
        let f = fixture(vec![], SchedulerConfig::default()).await;
        let before = f.scheduler.next_fire_times();

        f.clock.advance(ChronoDuration::minutes(10));
        let mut schedules = ScheduleExpressions::standard();
        schedules.health_probe = Some(TriggerSpec::Interval { every_secs: 30 });
        schedules.weekly_deep_clean = None;
        f.scheduler.reschedule(&schedules, f.clock.now());

        let after = f.scheduler.next_fire_times();
        assert_eq!(after[&JobType::DailyRetention], before[&JobType::DailyRetention]);
        assert_eq!(after[&JobType::DiskCheck], before[&JobType::DiskCheck]);
        assert_eq!(
            after[&JobType::HealthProbe],
            f.clock.now() + ChronoDuration::seconds(30)
        );
        assert!(!after.contains_key(&JobType::WeeklyDeepClean));
    }

    #[tokio::test]
    async fn test_run_snapshot_ignores_later_settings() {
        let inspect = Arc::new(Inspect::default());
        let f = fixture(
            vec![(JobType::HealthProbe, inspect.clone() as Arc<dyn JobHandler>)],
            SchedulerConfig::default(),
        )
        .await;

        let handle = f
            .scheduler
            .dispatch(JobType::HealthProbe, RunTrigger::Manual)
            .unwrap();
        f.settings
            .apply(
                &PolicyCandidate {
                    retention_days: Some(5),
                    ..RetentionPolicy::default().to_candidate()
                },
                ChangeNote::default(),
            )
            .await
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(inspect.seen.lock()[0].policy.retention_days, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_dispatches_breach_and_reschedules() {
        let inspect = Arc::new(Inspect::default());
        let f = fixture(
            vec![(JobType::EmergencyCleanup, inspect.clone() as Arc<dyn JobHandler>)],
            SchedulerConfig::default(),
        )
        .await;

        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let scheduler = f.scheduler.clone();
        let loop_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(rx, shutdown).await }
        });

        let event = BreachEvent {
            sample: DiskSample::new(t0(), 90, 100),
            threshold_percent: 85,
        };
        tx.send(event).await.unwrap();

        let mut schedules = ScheduleExpressions::standard();
        schedules.daily_retention = None;
        f.settings
            .apply(
                &PolicyCandidate {
                    schedules: Some(schedules),
                    ..RetentionPolicy::default().to_candidate()
                },
                ChangeNote::default(),
            )
            .await
            .unwrap();

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        loop_task.await.unwrap();

        let seen = inspect.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].trigger, RunTrigger::Breach);
        assert_eq!(seen[0].breach, Some(event));
        assert!(!f
            .scheduler
            .next_fire_times()
            .contains_key(&JobType::DailyRetention));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_picks_up_policy_applied_before_start() {
        let f = fixture(vec![], SchedulerConfig::default()).await;
        assert!(f
            .scheduler
            .next_fire_times()
            .contains_key(&JobType::WeeklyDeepClean));

        let mut schedules = ScheduleExpressions::standard();
        schedules.weekly_deep_clean = None;
        f.settings
            .apply(
                &PolicyCandidate {
                    schedules: Some(schedules),
                    ..RetentionPolicy::default().to_candidate()
                },
                ChangeNote::default(),
            )
            .await
            .unwrap();

        let (_tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let scheduler = f.scheduler.clone();
        let loop_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(rx, shutdown).await }
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        loop_task.await.unwrap();

        assert!(!f
            .scheduler
            .next_fire_times()
            .contains_key(&JobType::WeeklyDeepClean));
    }
}
