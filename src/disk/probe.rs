use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("no mounted disk contains {0}")]
    NoVolume(PathBuf),

    #[error("disk probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("disk probe unavailable: {0}")]
    Unavailable(String),
}

/// Raw usage of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Reads the usage of the watched volume.
#[async_trait]
pub trait VolumeProbe: Send + Sync {
    async fn usage(&self) -> Result<VolumeUsage, ProbeError>;
}

/// Resolves the volume through sysinfo's disk list.
#[derive(Debug, Clone)]
pub struct SysinfoProbe {
    path: PathBuf,
}

impl SysinfoProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VolumeProbe for SysinfoProbe {
    async fn usage(&self) -> Result<VolumeUsage, ProbeError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<VolumeUsage, ProbeError> {
            let disks = sysinfo::Disks::new_with_refreshed_list();
            let mounts = disks
                .list()
                .iter()
                .map(|d| (d.mount_point(), d.total_space(), d.available_space()));
            let (_, total, available) = longest_mount_prefix(&path, mounts)
                .ok_or_else(|| ProbeError::NoVolume(path.clone()))?;
            Ok(VolumeUsage {
                used_bytes: total.saturating_sub(available),
                total_bytes: total,
            })
        })
        .await?
    }
}

/// The mount whose path is the longest prefix of `path`.
fn longest_mount_prefix<'a>(
    path: &Path,
    mounts: impl Iterator<Item = (&'a Path, u64, u64)>,
) -> Option<(&'a Path, u64, u64)> {
    mounts
        .filter(|(mount, _, _)| path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
}

/// Reports whatever it was last told. For tests and dry runs.
#[derive(Debug)]
pub struct StaticProbe {
    state: Mutex<Result<VolumeUsage, String>>,
}

impl StaticProbe {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self {
            state: Mutex::new(Ok(VolumeUsage {
                used_bytes,
                total_bytes,
            })),
        }
    }

    /// A 100-byte volume at `percent` usage.
    pub fn percent(percent: u64) -> Self {
        Self::new(percent, 100)
    }

    pub fn set(&self, used_bytes: u64, total_bytes: u64) {
        *self.state.lock() = Ok(VolumeUsage {
            used_bytes,
            total_bytes,
        });
    }

    pub fn set_percent(&self, percent: u64) {
        self.set(percent, 100);
    }

    /// Make every following read fail until the next `set`.
    pub fn fail(&self, message: impl Into<String>) {
        *self.state.lock() = Err(message.into());
    }
}

#[async_trait]
impl VolumeProbe for StaticProbe {
    async fn usage(&self) -> Result<VolumeUsage, ProbeError> {
        self.state.lock().clone().map_err(ProbeError::Unavailable)
    }
}
