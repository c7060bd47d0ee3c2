use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Disk pressure monitor configuration.
///
/// The breach threshold is not configured here: it is part of the live
/// policy and re-read on every sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Any path on the watched volume. The disk with the longest mount point
    /// containing it is sampled.
    /// Default: "/"
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Number of samples kept for trend queries.
    /// Default: 120
    #[serde(default = "default_sample_history")]
    pub sample_history: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            sample_history: default_sample_history(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("/")
}

fn default_sample_history() -> usize {
    120
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_history == 0 {
            return Err("monitor.sample_history must be at least 1".into());
        }
        Ok(())
    }
}
