use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    emergency::Remediator,
    engine::EngineStats,
    models::{JobOutcome, MetricsSnapshot},
    scheduler::{JobContext, JobError, JobHandler},
};

/// Runs the remediation cascade. Never returns `Err`: failed steps are
/// reported in the outcome's errors.
pub struct EmergencyJob {
    remediator: Arc<Remediator>,
    stats: Arc<EngineStats>,
}

impl EmergencyJob {
    pub fn new(remediator: Arc<Remediator>, stats: Arc<EngineStats>) -> Self {
        Self { remediator, stats }
    }
}

#[async_trait]
impl JobHandler for EmergencyJob {
    async fn run(&self, ctx: JobContext) -> Result<JobOutcome, JobError> {
        let report = self
            .remediator
            .remediate(ctx.run_id, &ctx.policy, ctx.breach.as_ref())
            .await;
        self.stats.add_archived(report.archived);

        let metrics = MetricsSnapshot {
            disk_used_percent: ctx.breach.map(|b| b.sample.used_percent),
            alert_id: Some(report.alert.id),
            ..Default::default()
        }
        .with_detail("files_removed", report.files_removed as f64)
        .with_detail("bytes_freed", report.bytes_freed as f64);

        Ok(JobOutcome {
            archived_count: report.archived,
            errors: report.errors,
            metrics,
        })
    }
}
