use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of volume usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskSample {
    pub timestamp: DateTime<Utc>,
    pub used_bytes: u64,
    pub total_bytes: u64,
    /// `used_bytes / total_bytes * 100`; 0 for an empty volume.
    pub used_percent: f64,
}

impl DiskSample {
    pub fn new(timestamp: DateTime<Utc>, used_bytes: u64, total_bytes: u64) -> Self {
        let used_percent = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };
        Self {
            timestamp,
            used_bytes,
            total_bytes,
            used_percent,
        }
    }

    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_percent_derived() {
        let sample = DiskSample::new(Utc::now(), 860, 1000);
        assert!((sample.used_percent - 86.0).abs() < f64::EPSILON);
        assert_eq!(sample.free_bytes(), 140);
    }

    #[test]
    fn test_empty_volume_is_zero_percent() {
        let sample = DiskSample::new(Utc::now(), 0, 0);
        assert_eq!(sample.used_percent, 0.0);
    }
}
