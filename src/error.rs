//! Errors returned by engine operations.

use crate::{
    archive::StoreError,
    config::ConfigError,
    models::JobType,
    observability::{TracingError, metrics::MetricsError},
    scheduler::DispatchError,
    settings::{PersistenceError, SettingsError, ValidationError},
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The caller supplied a value that fails validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Store, disk or transport failure. Scheduled work retries on its next
    /// tick.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// The job ran to completion but some of its steps failed.
    #[error("{job_type} finished with {} failed step(s): {}", .errors.len(), .errors.join("; "))]
    PartialFailure {
        job_type: JobType,
        errors: Vec<String>,
    },

    #[error("{0} is already running")]
    AlreadyRunning(JobType),

    #[error("settings version {0} not found")]
    VersionNotFound(u64),

    /// A retention pass failed after deleting `archived` records.
    #[error("cleanup failed after archiving {archived} records: {message}")]
    Archive { archived: u64, message: String },

    #[error("no handler for {0}")]
    Unsupported(JobType),

    #[error("job {0} was dropped before finishing")]
    Lost(JobType),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

impl From<SettingsError> for EngineError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Validation(e) => EngineError::Validation(e),
            SettingsError::Persistence(e) => e.into(),
            SettingsError::VersionNotFound(v) => EngineError::VersionNotFound(v),
        }
    }
}

impl From<PersistenceError> for EngineError {
    fn from(e: PersistenceError) -> Self {
        EngineError::TransientIo(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::TransientIo(e.to_string())
    }
}

impl From<DispatchError> for EngineError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::AlreadyRunning(job_type) => EngineError::AlreadyRunning(job_type),
            DispatchError::NoHandler(job_type) => EngineError::Unsupported(job_type),
        }
    }
}

impl EngineError {
    /// Whether the caller can fix the request and retry.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::VersionNotFound(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
