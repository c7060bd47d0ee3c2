use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};

/// Host and process resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Global CPU usage since the previous sample.
    pub cpu_percent: f32,
    pub memory_used_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// Resident memory of this process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_memory_bytes: Option<u64>,
}

/// Keeps one `System` alive so CPU usage is measured between samples.
#[derive(Clone)]
pub struct SystemSampler {
    system: Arc<Mutex<System>>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    pub async fn sample(&self) -> Result<SystemMetrics, tokio::task::JoinError> {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || collect(&mut system.lock())).await
    }
}

fn collect(sys: &mut System) -> SystemMetrics {
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let process_memory_bytes = sysinfo::get_current_pid().ok().and_then(|pid| {
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).map(|p| p.memory())
    });

    let total = sys.total_memory();
    let used = sys.used_memory();
    SystemMetrics {
        cpu_percent: sys.global_cpu_usage(),
        memory_used_percent: if total == 0 {
            0.0
        } else {
            (used as f64 / total as f64 * 100.0) as f32
        },
        memory_used_bytes: used,
        memory_total_bytes: total,
        process_memory_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_reports_memory() {
        let sampler = SystemSampler::new();
        let metrics = sampler.sample().await.unwrap();
        assert!(metrics.memory_total_bytes > 0);
        assert!((0.0..=100.0).contains(&metrics.memory_used_percent));
    }
}
