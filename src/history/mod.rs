//! Append-only log of finished job runs.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::models::{JobType, MaintenanceJobRun};

/// Bounded run log ordered by `started_at`.
///
/// Runs may finish out of order (a long retention sweep finishing after a
/// later disk check), so appends insert at the position matching their start
/// time. Past `max_runs` the oldest runs are evicted.
#[derive(Debug)]
pub struct RunHistory {
    runs: RwLock<VecDeque<MaintenanceJobRun>>,
    max_runs: usize,
}

impl RunHistory {
    pub fn new(max_runs: usize) -> Self {
        Self {
            runs: RwLock::new(VecDeque::new()),
            max_runs: max_runs.max(1),
        }
    }

    pub fn append(&self, run: MaintenanceJobRun) {
        let mut runs = self.runs.write();
        let pos = runs.partition_point(|r| r.started_at <= run.started_at);
        runs.insert(pos, run);
        while runs.len() > self.max_runs {
            runs.pop_front();
        }
    }

    /// Up to `limit` runs, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<MaintenanceJobRun> {
        self.runs.read().iter().rev().take(limit).cloned().collect()
    }

    /// Every retained run, oldest first.
    pub fn all(&self) -> Vec<MaintenanceJobRun> {
        self.runs.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    /// The most recent successful run of `job_type`.
    pub fn last_success(&self, job_type: JobType) -> Option<MaintenanceJobRun> {
        self.runs
            .read()
            .iter()
            .rev()
            .find(|r| r.job_type == job_type && r.success)
            .cloned()
    }

    /// Per-job-type statistics over runs started at or after `since`.
    pub fn summary(&self, since: Option<DateTime<Utc>>) -> HistorySummary {
        let runs = self.runs.read();
        let mut jobs: BTreeMap<JobType, JobStats> = BTreeMap::new();

        for run in runs
            .iter()
            .filter(|r| since.is_none_or(|since| r.started_at >= since))
        {
            jobs.entry(run.job_type).or_default().add(run);
        }

        HistorySummary { since, jobs }
    }
}

/// Aggregates returned by [`RunHistory::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub since: Option<DateTime<Utc>>,
    pub jobs: BTreeMap<JobType, JobStats>,
}

impl HistorySummary {
    pub fn total_runs(&self) -> u64 {
        self.jobs.values().map(|s| s.runs).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub total_archived: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl JobStats {
    fn add(&mut self, run: &MaintenanceJobRun) {
        let duration = run.duration_ms();
        self.runs += 1;
        if !run.success {
            self.failures += 1;
        }
        self.total_archived += run.archived_count;
        self.total_duration_ms += duration;
        self.max_duration_ms = self.max_duration_ms.max(duration);
        self.last_run_at = Some(
            self.last_run_at
                .map_or(run.started_at, |t| t.max(run.started_at)),
        );
    }

    /// Fraction of runs that succeeded, 0.0 to 1.0.
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        (self.runs - self.failures) as f64 / self.runs as f64
    }

    pub fn avg_duration_ms(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.runs as f64
    }
}
