use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    archive::RecordStore,
    disk::DiskMonitor,
    engine::SystemSampler,
    models::{JobOutcome, MetricsSnapshot},
    scheduler::{JobContext, JobError, JobHandler},
};

/// Checks that the record store and the watched volume are reachable.
pub struct HealthProbeJob {
    store: Arc<dyn RecordStore>,
    monitor: Arc<DiskMonitor>,
    system: SystemSampler,
}

impl HealthProbeJob {
    pub fn new(store: Arc<dyn RecordStore>, monitor: Arc<DiskMonitor>, system: SystemSampler) -> Self {
        Self {
            store,
            monitor,
            system,
        }
    }
}

#[async_trait]
impl JobHandler for HealthProbeJob {
    async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
        let mut errors = Vec::new();
        let mut metrics = MetricsSnapshot::default();

        match self.store.count().await {
            Ok(count) => metrics.records_remaining = Some(count),
            Err(e) => errors.push(format!("store {}: {e}", self.store.name())),
        }

        // Sampling alone leaves the breach latch to the disk check.
        match self.monitor.sample().await {
            Ok(sample) => metrics.disk_used_percent = Some(sample.used_percent),
            Err(e) => errors.push(format!("disk: {e}")),
        }

        match self.system.sample().await {
            Ok(system) => {
                metrics.cpu_percent = Some(system.cpu_percent);
                metrics.process_memory_bytes = system.process_memory_bytes;
            }
            Err(e) => tracing::debug!(error = %e, "System sample failed"),
        }

        Ok(JobOutcome {
            archived_count: 0,
            errors,
            metrics,
        })
    }
}

/// Samples disk usage and evaluates the breach latch.
pub struct DiskCheckJob {
    monitor: Arc<DiskMonitor>,
}

impl DiskCheckJob {
    pub fn new(monitor: Arc<DiskMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl JobHandler for DiskCheckJob {
    async fn run(&self, _ctx: JobContext) -> Result<JobOutcome, JobError> {
        let check = self.monitor.check().await?;
        let metrics = MetricsSnapshot {
            disk_used_percent: Some(check.sample.used_percent),
            ..Default::default()
        }
        .with_detail("threshold_percent", check.threshold_percent as f64)
        .with_detail("latched", if check.latched { 1.0 } else { 0.0 })
        .with_detail("breached", if check.breached { 1.0 } else { 0.0 });

        Ok(JobOutcome {
            archived_count: 0,
            errors: Vec::new(),
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::{
        archive::MemoryRecordStore,
        clock::{Clock, ManualClock},
        disk::StaticProbe,
        models::{JobType, RetentionPolicy, RunTrigger},
        settings::SettingsStore,
    };

    async fn monitor(probe: Arc<StaticProbe>) -> Arc<DiskMonitor> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ));
        let settings = Arc::new(
            SettingsStore::in_memory(RetentionPolicy::default(), clock.clone())
                .await
                .unwrap(),
        );
        let (monitor, _rx) = DiskMonitor::new(probe, settings, clock, 10);
        Arc::new(monitor)
    }

    fn ctx(job_type: JobType) -> JobContext {
        JobContext {
            run_id: Uuid::new_v4(),
            job_type,
            trigger: RunTrigger::Scheduled,
            started_at: Utc::now(),
            policy: Arc::new(RetentionPolicy::default()),
            breach: None,
        }
    }

    #[tokio::test]
    async fn test_health_probe_reports_store_and_disk() {
        let store = Arc::new(MemoryRecordStore::new());
        store.insert_at(1, Utc::now());
        let job = HealthProbeJob::new(
            store,
            monitor(Arc::new(StaticProbe::percent(42))).await,
            SystemSampler::new(),
        );

        let outcome = job.run(ctx(JobType::HealthProbe)).await.unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.metrics.records_remaining, Some(1));
        assert_eq!(outcome.metrics.disk_used_percent, Some(42.0));
    }

    #[tokio::test]
    async fn test_health_probe_unreachable_disk_fails() {
        let probe = Arc::new(StaticProbe::percent(42));
        probe.fail("device gone");
        let job = HealthProbeJob::new(
            Arc::new(MemoryRecordStore::new()),
            monitor(probe).await,
            SystemSampler::new(),
        );

        let outcome = job.run(ctx(JobType::HealthProbe)).await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("device gone"));
    }

    #[tokio::test]
    async fn test_disk_check_reports_latch() {
        let job = DiskCheckJob::new(monitor(Arc::new(StaticProbe::percent(90))).await);
        let outcome = job.run(ctx(JobType::DiskCheck)).await.unwrap();
        assert_eq!(outcome.metrics.details["breached"], 1.0);
        assert_eq!(outcome.metrics.details["threshold_percent"], 85.0);

        let outcome = job.run(ctx(JobType::DiskCheck)).await.unwrap();
        assert_eq!(outcome.metrics.details["breached"], 0.0);
        assert_eq!(outcome.metrics.details["latched"], 1.0);
    }

    #[tokio::test]
    async fn test_disk_check_probe_error_is_job_error() {
        let probe = Arc::new(StaticProbe::percent(10));
        probe.fail("io");
        let job = DiskCheckJob::new(monitor(probe).await);
        assert!(matches!(
            job.run(ctx(JobType::DiskCheck)).await,
            Err(JobError::Probe(_))
        ));
    }
}
