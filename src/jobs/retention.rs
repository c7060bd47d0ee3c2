//! Retention passes: the daily sweep, the weekly deep clean and manual
//! cleanups.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    archive::{ArchiveMode, Archiver},
    clock::Clock,
    emergency::Remediator,
    engine::EngineStats,
    models::{AlertDraft, AlertSeverity, JobOutcome, MetricsSnapshot},
    notify::Notifier,
    scheduler::{JobContext, JobError, JobHandler},
};

/// When routine passes send a summary alert. Both are further gated by the
/// live policy's `notifications_enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryFlags {
    pub on_success: bool,
    pub on_failure: bool,
}

impl SummaryFlags {
    fn wants(&self, success: bool) -> bool {
        if success {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

/// Collaborators shared by every retention pass.
#[derive(Clone)]
pub struct RetentionDeps {
    pub archiver: Arc<Archiver>,
    pub remediator: Arc<Remediator>,
    pub notifier: Arc<Notifier>,
    pub stats: Arc<EngineStats>,
    pub clock: Arc<dyn Clock>,
    pub summaries: SummaryFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPass {
    /// Live retention window, standard mode.
    Daily,
    /// Live retention window with compaction, then a temp-file purge.
    DeepClean,
    /// Caller-supplied window.
    Manual { days: u32, optimize: bool },
}

impl RetentionPass {
    fn mode(&self) -> ArchiveMode {
        match self {
            RetentionPass::Daily | RetentionPass::Manual { optimize: false, .. } => {
                ArchiveMode::Standard
            }
            RetentionPass::DeepClean | RetentionPass::Manual { optimize: true, .. } => {
                ArchiveMode::Compact
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RetentionPass::Daily => "Daily retention",
            RetentionPass::DeepClean => "Weekly deep clean",
            RetentionPass::Manual { .. } => "Manual cleanup",
        }
    }
}

pub struct RetentionJob {
    deps: RetentionDeps,
    pass: RetentionPass,
}

impl RetentionJob {
    pub fn new(deps: RetentionDeps, pass: RetentionPass) -> Self {
        Self { deps, pass }
    }
}

#[async_trait]
impl JobHandler for RetentionJob {
    async fn run(&self, ctx: JobContext) -> Result<JobOutcome, JobError> {
        let days = match self.pass {
            RetentionPass::Manual { days, .. } => days,
            _ => ctx.policy.retention_days,
        };
        let mode = self.pass.mode();
        let mut errors = Vec::new();
        let mut metrics = MetricsSnapshot::default();

        let archived = match self
            .deps
            .archiver
            .archive(days, mode, ctx.policy.batch_size)
            .await
        {
            Ok(archived) => {
                self.deps.stats.record_cleanup(self.deps.clock.now());
                archived
            }
            Err(e) => {
                errors.push(e.to_string());
                e.archived
            }
        };
        self.deps.stats.add_archived(archived);

        if self.pass == RetentionPass::DeepClean {
            match self.deps.remediator.purge_temp().await {
                Ok(report) => {
                    metrics = metrics
                        .with_detail("files_removed", report.files_removed as f64)
                        .with_detail("bytes_freed", report.bytes_freed as f64);
                    if let Some(summary) = report.error_summary() {
                        errors.push(format!("temp_purge: {summary}"));
                    }
                }
                Err(e) => errors.push(format!("temp_purge: {e}")),
            }
        }

        match self.deps.archiver.store().count().await {
            Ok(remaining) => metrics.records_remaining = Some(remaining),
            Err(e) => tracing::debug!(error = %e, "Could not count remaining records"),
        }

        let success = errors.is_empty();
        if ctx.policy.notifications_enabled && self.deps.summaries.wants(success) {
            let draft = summary_draft(self.pass, days, archived, &errors).for_run(ctx.run_id);
            let alert = self.deps.notifier.send(draft).await;
            metrics.alert_id = Some(alert.id);
        }

        Ok(JobOutcome {
            archived_count: archived,
            errors,
            metrics,
        })
    }
}

fn summary_draft(pass: RetentionPass, days: u32, archived: u64, errors: &[String]) -> AlertDraft {
    if errors.is_empty() {
        AlertDraft::new(
            AlertSeverity::Info,
            format!("{} completed", pass.label()),
            format!("Archived {archived} records older than {days} days."),
        )
    } else {
        AlertDraft::new(
            AlertSeverity::Warning,
            format!("{} failed", pass.label()),
            format!(
                "Archived {archived} records older than {days} days before failing.\n{}",
                errors.join("\n")
            ),
        )
    }
}
