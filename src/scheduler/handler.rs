use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    archive::{ArchiveError, StoreError},
    disk::{BreachEvent, ProbeError},
    models::{JobOutcome, JobType, RetentionPolicy, RunTrigger},
};

/// What a handler knows about the run it is executing.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: Uuid,
    pub job_type: JobType,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    /// Policy snapshot taken at dispatch. Settings changes made while the
    /// run is in flight are not visible here.
    pub policy: Arc<RetentionPolicy>,
    /// The breach that caused this run, for breach-triggered runs.
    pub breach: Option<BreachEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("disk probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// Records deleted before the failure.
    pub fn archived(&self) -> u64 {
        match self {
            JobError::Archive(e) => e.archived,
            _ => 0,
        }
    }
}

/// The work behind one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<JobOutcome, JobError>;
}
