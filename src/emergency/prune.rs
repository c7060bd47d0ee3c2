use std::{
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use walkdir::WalkDir;

/// Failures beyond this many are summarized instead of listed.
const MAX_LISTED_ERRORS: usize = 10;

/// Files removed by one pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PruneReport {
    pub files_removed: u64,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

impl PruneReport {
    fn push_error(&mut self, path: &Path, error: impl std::fmt::Display) {
        self.errors.push(format!("{}: {error}", path.display()));
    }

    /// Failures capped to a readable length.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let mut summary = self.errors[..self.errors.len().min(MAX_LISTED_ERRORS)].join("; ");
        if self.errors.len() > MAX_LISTED_ERRORS {
            summary.push_str(&format!(
                "; and {} more",
                self.errors.len() - MAX_LISTED_ERRORS
            ));
        }
        Some(summary)
    }
}

/// Remove regular files under `dirs` last modified before `now - max_age`.
///
/// Directories are left in place. A directory that does not exist is
/// skipped. Every other failure is collected and the walk continues.
pub async fn prune_older_than(
    dirs: Vec<PathBuf>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<PruneReport, tokio::task::JoinError> {
    let cutoff = SystemTime::from(now - max_age);
    tokio::task::spawn_blocking(move || {
        let mut report = PruneReport::default();
        for dir in &dirs {
            prune_dir(dir, cutoff, &mut report);
        }
        report
    })
    .await
}

fn prune_dir(dir: &Path, cutoff: SystemTime, report: &mut PruneReport) {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Skipping missing directory");
        return;
    }

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                report.push_error(&path, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                report.push_error(entry.path(), e);
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                report.push_error(entry.path(), e);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.files_removed += 1;
                report.bytes_freed += metadata.len();
                tracing::trace!(path = %entry.path().display(), "Removed file");
            }
            // Raced with another cleaner.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => report.push_error(entry.path(), e),
        }
    }
}
