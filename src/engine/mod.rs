//! The maintenance engine.
//!
//! [`MaintenanceEngine`] owns every component (settings, history, archiver,
//! disk monitor, notifier, remediator, scheduler) and exposes the operations
//! callers use to inspect and steer it. Authorization is the caller's job.

mod stats;
mod system;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
pub use stats::*;
pub use system::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    archive::{
        Archiver, BackupSink, BatchOptimizer, JsonlBackupSink, RecordStore, build_store,
    },
    clock::{Clock, SystemClock},
    config::EngineConfig,
    disk::{BreachEvent, DiskMonitor, SysinfoProbe, VolumeProbe},
    emergency::Remediator,
    error::{EngineError, EngineResult},
    history::{HistorySummary, RunHistory},
    jobs::{
        DiskCheckJob, EmergencyJob, HealthProbeJob, RetentionDeps, RetentionJob, RetentionPass,
        SummaryFlags,
    },
    models::{
        Alert, DiskSample, JobType, MaintenanceJobRun, PolicyCandidate, PolicyVersion,
        RetentionPolicy, RunTrigger,
    },
    notify::{AlertChannel, Notifier, build_channel},
    scheduler::{JobHandle, JobHandler, Scheduler},
    settings::{
        ChangeNote, JsonFileSettings, MemorySettings, SettingsPersistence, SettingsStore,
        ValidationError,
    },
};

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub total_archived: u64,
    pub next_scheduled_runs: BTreeMap<JobType, DateTime<Utc>>,
    pub active_jobs: Vec<JobType>,
    /// Missing when the host could not be sampled.
    pub system: Option<SystemMetrics>,
    /// Latest disk sample, if any was taken.
    pub disk_usage: Option<DiskSample>,
    /// Percentage-point change across the retained samples.
    pub disk_trend: Option<f64>,
    pub breach_latched: bool,
    /// Advisory; never applied to the live policy.
    pub recommended_batch_size: u32,
    pub settings_version: u64,
}

/// The swappable edges of the engine.
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub backup: Arc<dyn BackupSink>,
    pub probe: Arc<dyn VolumeProbe>,
    pub channel: Arc<dyn AlertChannel>,
    pub persistence: Arc<dyn SettingsPersistence>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Production collaborators described by `config`.
    pub async fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let store = build_store(&config.store).await?;
        let persistence: Arc<dyn SettingsPersistence> = match &config.settings.path {
            Some(path) => Arc::new(JsonFileSettings::new(path)),
            None => {
                tracing::warn!("No settings path configured; policy changes will not survive a restart");
                Arc::new(MemorySettings::default())
            }
        };

        Ok(Self {
            store,
            backup: Arc::new(JsonlBackupSink::new(&config.backup.dir)),
            probe: Arc::new(SysinfoProbe::new(&config.monitor.path)),
            channel: build_channel(&config.notifications),
            persistence,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Everything the engine owns.
pub struct EngineContext {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<SettingsStore>,
    pub history: Arc<RunHistory>,
    pub archiver: Arc<Archiver>,
    pub monitor: Arc<DiskMonitor>,
    pub notifier: Arc<Notifier>,
    pub remediator: Arc<Remediator>,
    pub stats: Arc<EngineStats>,
    pub system: SystemSampler,
    pub scheduler: Scheduler,
    retention: RetentionDeps,
}

pub struct MaintenanceEngine {
    ctx: Arc<EngineContext>,
    breaches: Mutex<Option<mpsc::Receiver<BreachEvent>>>,
}

impl MaintenanceEngine {
    /// Build an engine with the production collaborators.
    pub async fn from_config(config: EngineConfig) -> EngineResult<Self> {
        let collaborators = Collaborators::from_config(&config).await?;
        Self::assemble(config, collaborators).await
    }

    /// Wire an engine from explicit collaborators.
    pub async fn assemble(config: EngineConfig, parts: Collaborators) -> EngineResult<Self> {
        config.validate()?;
        let clock = parts.clock;

        let settings = Arc::new(
            SettingsStore::open(parts.persistence, config.initial_policy()?, clock.clone())
                .await?,
        );
        let history = Arc::new(RunHistory::new(config.history.max_runs));
        let stats = Arc::new(EngineStats::new(clock.now()));
        let system = SystemSampler::new();

        let archiver = Arc::new(Archiver::new(
            parts.store.clone(),
            parts.backup,
            clock.clone(),
            BatchOptimizer::new(
                Duration::from_secs(config.archive.target_batch_secs),
                config.archive.max_memory_percent,
            ),
        ));
        let (monitor, breaches) = DiskMonitor::new(
            parts.probe,
            settings.clone(),
            clock.clone(),
            config.monitor.sample_history,
        );
        let monitor = Arc::new(monitor);
        let notifier = Arc::new(Notifier::new(
            parts.channel,
            clock.clone(),
            config.notifications.alert_log_size,
        ));
        let remediator = Arc::new(Remediator::new(
            archiver.clone(),
            notifier.clone(),
            clock.clone(),
            config.emergency.clone(),
        ));

        let retention = RetentionDeps {
            archiver: archiver.clone(),
            remediator: remediator.clone(),
            notifier: notifier.clone(),
            stats: stats.clone(),
            clock: clock.clone(),
            summaries: SummaryFlags {
                on_success: config.notifications.notify_on_success,
                on_failure: config.notifications.notify_on_failure,
            },
        };
        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(
            JobType::DailyRetention,
            Arc::new(RetentionJob::new(retention.clone(), RetentionPass::Daily)),
        );
        handlers.insert(
            JobType::WeeklyDeepClean,
            Arc::new(RetentionJob::new(retention.clone(), RetentionPass::DeepClean)),
        );
        handlers.insert(
            JobType::HealthProbe,
            Arc::new(HealthProbeJob::new(parts.store, monitor.clone(), system.clone())),
        );
        handlers.insert(JobType::DiskCheck, Arc::new(DiskCheckJob::new(monitor.clone())));
        handlers.insert(
            JobType::EmergencyCleanup,
            Arc::new(EmergencyJob::new(remediator.clone(), stats.clone())),
        );
        let scheduler = Scheduler::new(
            handlers,
            settings.clone(),
            history.clone(),
            clock.clone(),
            config.scheduler.clone(),
        );

        tracing::info!(
            store = archiver.store().name(),
            channel = notifier.channel_name(),
            settings_version = settings.head_version(),
            "Maintenance engine assembled"
        );

        Ok(Self {
            ctx: Arc::new(EngineContext {
                config,
                clock,
                settings,
                history,
                archiver,
                monitor,
                notifier,
                remediator,
                stats,
                system,
                scheduler,
                retention,
            }),
            breaches: Mutex::new(Some(breaches)),
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Run the scheduler until `shutdown` is cancelled.
    ///
    /// Only the first call drives the scheduler; later calls return
    /// immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(breaches) = self.breaches.lock().take() else {
            tracing::warn!("Engine loop already started");
            return;
        };
        self.ctx.scheduler.run(breaches, shutdown).await;
    }

    /// Archive records older than `days` now, under the daily retention
    /// guard.
    ///
    /// On failure the error carries how many records were archived first.
    pub async fn trigger_cleanup(&self, days: u32, optimize: bool) -> EngineResult<u64> {
        if days == 0 {
            return Err(ValidationError::new("days", "must be at least 1").into());
        }

        let handler = Arc::new(RetentionJob::new(
            self.ctx.retention.clone(),
            RetentionPass::Manual { days, optimize },
        ));

        let handle =
            self.ctx
                .scheduler
                .dispatch_with(JobType::DailyRetention, RunTrigger::Manual, handler)?;
        let run = wait(handle).await?;

        if run.success {
            Ok(run.archived_count)
        } else {
            Err(EngineError::Archive {
                archived: run.archived_count,
                message: run.errors.join("; "),
            })
        }
    }

    /// Run any registered job now and wait for it.
    pub async fn run_job(&self, job_type: JobType) -> EngineResult<MaintenanceJobRun> {
        let handle = self.ctx.scheduler.dispatch(job_type, RunTrigger::Manual)?;
        let run = wait(handle).await?;
        if run.success {
            Ok(run)
        } else {
            Err(EngineError::PartialFailure {
                job_type,
                errors: run.errors,
            })
        }
    }

    pub async fn get_status(&self) -> EngineStatus {
        let now = self.ctx.clock.now();
        let policy = self.ctx.settings.current();
        let system = match self.ctx.system.sample().await {
            Ok(system) => Some(system),
            Err(e) => {
                tracing::debug!(error = %e, "System sample failed");
                None
            }
        };

        EngineStatus {
            started_at: self.ctx.stats.started_at(),
            uptime_secs: (now - self.ctx.stats.started_at()).num_seconds().max(0) as u64,
            last_cleanup: self.ctx.stats.last_cleanup(),
            total_archived: self.ctx.stats.total_archived(),
            next_scheduled_runs: self.ctx.scheduler.next_fire_times(),
            active_jobs: self.ctx.scheduler.active_jobs(),
            system,
            disk_usage: self.ctx.monitor.latest(),
            disk_trend: self.ctx.monitor.trend(),
            breach_latched: self.ctx.monitor.is_latched(),
            recommended_batch_size: self
                .ctx
                .archiver
                .optimizer()
                .recommend(policy.batch_size, system.map(|s| s.memory_used_percent)),
            settings_version: self.ctx.settings.head_version(),
        }
    }

    /// Finished runs, most recent first.
    pub fn get_history(&self, limit: usize) -> Vec<MaintenanceJobRun> {
        self.ctx.history.recent(limit)
    }

    pub fn history_summary(&self, since: Option<DateTime<Utc>>) -> HistorySummary {
        self.ctx.history.summary(since)
    }

    pub fn get_settings(&self) -> Arc<RetentionPolicy> {
        self.ctx.settings.current()
    }

    pub async fn update_settings(
        &self,
        candidate: &PolicyCandidate,
        author: Option<String>,
        comment: Option<String>,
    ) -> EngineResult<PolicyVersion> {
        let note = ChangeNote { author, comment };
        Ok(self.ctx.settings.apply(candidate, note).await?)
    }

    /// Every policy version, oldest first.
    pub fn get_settings_history(&self) -> Vec<PolicyVersion> {
        self.ctx.settings.history()
    }

    pub async fn restore_settings(
        &self,
        version: u64,
        author: Option<String>,
    ) -> EngineResult<PolicyVersion> {
        let note = ChangeNote {
            author,
            comment: Some(format!("restore version {version}")),
        };
        Ok(self.ctx.settings.restore(version, note).await?)
    }

    /// Sent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.ctx.notifier.recent_alerts(limit)
    }

    /// Stop the scheduler without a running loop, e.g. after one-shot
    /// operations.
    pub async fn shutdown(&self) -> bool {
        self.ctx.scheduler.shutdown().await
    }
}

async fn wait(handle: JobHandle) -> EngineResult<MaintenanceJobRun> {
    let job_type = handle.job_type;
    handle.wait().await.ok_or(EngineError::Lost(job_type))
}
