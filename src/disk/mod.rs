//! Disk pressure monitor.
//!
//! Samples the watched volume and evaluates a latched threshold: the first
//! sample above the live threshold emits one [`BreachEvent`]; further samples
//! above it emit nothing until usage drops strictly below the threshold and
//! the latch clears. A sample exactly at the threshold leaves the latch as
//! it is.

mod probe;

use std::{collections::VecDeque, sync::Arc};

use parking_lot::{Mutex, RwLock};
pub use probe::*;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{clock::Clock, models::DiskSample, observability::metrics, settings::SettingsStore};

/// Breach events waiting for the scheduler. Breaches are rare; a full queue
/// only means an emergency run is already pending.
const BREACH_QUEUE: usize = 8;

/// Emitted once per latch transition into the breached state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreachEvent {
    pub sample: DiskSample,
    pub threshold_percent: u8,
}

/// Result of one [`DiskMonitor::check`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiskCheck {
    pub sample: DiskSample,
    pub threshold_percent: u8,
    /// Latch state after this sample.
    pub latched: bool,
    /// This sample set the latch.
    pub breached: bool,
}

pub struct DiskMonitor {
    probe: Arc<dyn VolumeProbe>,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn Clock>,
    samples: RwLock<VecDeque<DiskSample>>,
    capacity: usize,
    latched: Mutex<bool>,
    breaches: mpsc::Sender<BreachEvent>,
}

impl DiskMonitor {
    /// Build a monitor and the receiving end of its breach events.
    pub fn new(
        probe: Arc<dyn VolumeProbe>,
        settings: Arc<SettingsStore>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<BreachEvent>) {
        let (breaches, rx) = mpsc::channel(BREACH_QUEUE);
        let capacity = capacity.max(1);
        let monitor = Self {
            probe,
            settings,
            clock,
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            latched: Mutex::new(false),
            breaches,
        };
        (monitor, rx)
    }

    /// Read the volume and record the sample in the ring. The latch is left
    /// alone.
    pub async fn sample(&self) -> Result<DiskSample, ProbeError> {
        let usage = self.probe.usage().await.inspect_err(|e| {
            metrics::record_disk_probe_error();
            tracing::warn!(error = %e, "Disk probe failed");
        })?;
        let sample = DiskSample::new(self.clock.now(), usage.used_bytes, usage.total_bytes);

        self.push_sample(sample);
        metrics::record_disk_usage(sample.used_percent, sample.used_bytes, sample.total_bytes);
        Ok(sample)
    }

    /// Sample and evaluate the latch against the live threshold.
    ///
    /// A failed probe leaves the latch and the ring untouched.
    pub async fn check(&self) -> Result<DiskCheck, ProbeError> {
        let sample = self.sample().await?;
        let threshold = self.settings.current().disk_threshold_percent;

        let (latched, breached) = {
            let mut latched = self.latched.lock();
            let threshold = threshold as f64;
            let breached = !*latched && sample.used_percent > threshold;
            if breached {
                *latched = true;
                metrics::record_disk_latch(true);
            } else if *latched && sample.used_percent < threshold {
                *latched = false;
                metrics::record_disk_latch(false);
                tracing::info!(
                    used_percent = sample.used_percent,
                    threshold_percent = threshold,
                    "Disk pressure cleared"
                );
            }
            (*latched, breached)
        };

        if breached {
            tracing::warn!(
                used_percent = sample.used_percent,
                threshold_percent = threshold,
                used_bytes = sample.used_bytes,
                total_bytes = sample.total_bytes,
                "Disk usage above threshold"
            );
            let event = BreachEvent {
                sample,
                threshold_percent: threshold,
            };
            if let Err(e) = self.breaches.try_send(event) {
                tracing::warn!(error = %e, "Breach event dropped; an emergency run is already queued");
            }
        } else {
            tracing::debug!(
                used_percent = sample.used_percent,
                threshold_percent = threshold,
                latched,
                "Disk sampled"
            );
        }

        Ok(DiskCheck {
            sample,
            threshold_percent: threshold,
            latched,
            breached,
        })
    }

    fn push_sample(&self, sample: DiskSample) {
        let mut samples = self.samples.write();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn is_latched(&self) -> bool {
        *self.latched.lock()
    }

    pub fn latest(&self) -> Option<DiskSample> {
        self.samples.read().back().copied()
    }

    /// Retained samples, oldest first.
    pub fn recent_samples(&self) -> Vec<DiskSample> {
        self.samples.read().iter().copied().collect()
    }

    /// Percentage-point change from the oldest to the newest retained sample.
    pub fn trend(&self) -> Option<f64> {
        let samples = self.samples.read();
        match (samples.front(), samples.back()) {
            (Some(first), Some(last)) if samples.len() > 1 => {
                Some(last.used_percent - first.used_percent)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        clock::ManualClock,
        models::{PolicyCandidate, RetentionPolicy},
        settings::ChangeNote,
    };

    async fn setup(
        probe: Arc<StaticProbe>,
        capacity: usize,
    ) -> (DiskMonitor, mpsc::Receiver<BreachEvent>, Arc<SettingsStore>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        ));
        let settings = Arc::new(
            SettingsStore::in_memory(RetentionPolicy::default(), clock.clone())
                .await
                .unwrap(),
        );
        let (monitor, rx) = DiskMonitor::new(probe, settings.clone(), clock, capacity);
        (monitor, rx, settings)
    }

    #[tokio::test]
    async fn test_latch_fires_once_per_breach() {
        let probe = Arc::new(StaticProbe::percent(0));
        let (monitor, mut rx, _) = setup(probe.clone(), 120).await;

        let mut fired = Vec::new();
        for percent in [70, 80, 86, 90, 84, 88] {
            probe.set_percent(percent);
            let check = monitor.check().await.unwrap();
            if check.breached {
                fired.push(percent);
            }
        }

        assert_eq!(fired, vec![86, 88]);
        assert_eq!(rx.try_recv().unwrap().sample.used_percent, 86.0);
        assert_eq!(rx.try_recv().unwrap().sample.used_percent, 88.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_equal_to_threshold_holds_latch() {
        let probe = Arc::new(StaticProbe::percent(90));
        let (monitor, _rx, _) = setup(probe.clone(), 10).await;

        assert!(monitor.check().await.unwrap().breached);
        probe.set_percent(85);
        let check = monitor.check().await.unwrap();
        assert!(check.latched);
        probe.set_percent(90);
        assert!(!monitor.check().await.unwrap().breached);
    }

    #[tokio::test]
    async fn test_equal_to_threshold_does_not_breach() {
        let probe = Arc::new(StaticProbe::percent(85));
        let (monitor, _rx, _) = setup(probe, 10).await;
        let check = monitor.check().await.unwrap();
        assert!(!check.breached);
        assert!(!check.latched);
    }

    #[tokio::test]
    async fn test_threshold_read_live() {
        let probe = Arc::new(StaticProbe::percent(80));
        let (monitor, _rx, settings) = setup(probe, 10).await;

        assert!(!monitor.check().await.unwrap().breached);

        settings
            .apply(
                &PolicyCandidate {
                    disk_threshold_percent: Some(75),
                    ..RetentionPolicy::default().to_candidate()
                },
                ChangeNote::default(),
            )
            .await
            .unwrap();

        let check = monitor.check().await.unwrap();
        assert_eq!(check.threshold_percent, 75);
        assert!(check.breached);
    }

    #[tokio::test]
    async fn test_probe_failure_keeps_latch() {
        let probe = Arc::new(StaticProbe::percent(95));
        let (monitor, _rx, _) = setup(probe.clone(), 10).await;
        monitor.check().await.unwrap();

        probe.fail("io error");
        assert!(monitor.check().await.is_err());
        assert!(monitor.is_latched());
        assert_eq!(monitor.recent_samples().len(), 1);
    }

    #[tokio::test]
    async fn test_sample_records_without_latching() {
        let probe = Arc::new(StaticProbe::percent(97));
        let (monitor, mut rx, _) = setup(probe.clone(), 10).await;

        monitor.sample().await.unwrap();
        probe.set_percent(99);
        monitor.sample().await.unwrap();

        assert_eq!(monitor.recent_samples().len(), 2);
        assert_eq!(monitor.latest().unwrap().used_percent, 99.0);
        assert_eq!(monitor.trend(), Some(2.0));
        assert!(!monitor.is_latched());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ring_is_bounded_and_trend() {
        let probe = Arc::new(StaticProbe::percent(10));
        let (monitor, _rx, _) = setup(probe.clone(), 3).await;

        assert!(monitor.trend().is_none());
        for percent in [10, 20, 30, 40] {
            probe.set_percent(percent);
            monitor.check().await.unwrap();
        }

        let samples = monitor.recent_samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].used_percent, 20.0);
        assert_eq!(monitor.latest().unwrap().used_percent, 40.0);
        assert_eq!(monitor.trend(), Some(20.0));
    }
}
