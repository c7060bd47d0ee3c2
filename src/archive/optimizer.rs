//! Batch size recommendation from observed archive throughput.
//!
//! The recommendation is advisory: it is reported in status and never
//! changes the live policy.

use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};

const MAX_SAMPLES: usize = 100;
/// Recommendations look at this many of the most recent successful batches.
const RECENT_WINDOW: usize = 10;

/// Timing of one archive batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchSample {
    pub batch_size: u32,
    pub records: u64,
    pub duration: Duration,
    pub success: bool,
}

impl BatchSample {
    pub fn records_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return self.records as f64;
        }
        self.records as f64 / secs
    }
}

#[derive(Debug)]
pub struct BatchOptimizer {
    target: Duration,
    max_memory_percent: f32,
    samples: Mutex<VecDeque<BatchSample>>,
}

impl BatchOptimizer {
    pub fn new(target: Duration, max_memory_percent: f32) -> Self {
        Self {
            target,
            max_memory_percent,
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    pub fn record(&self, sample: BatchSample) {
        let mut samples = self.samples.lock();
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn samples(&self) -> Vec<BatchSample> {
        self.samples.lock().iter().copied().collect()
    }

    /// Suggested batch size given the one currently in use.
    ///
    /// Slower than 1.2x target shrinks by 20%, faster than 0.8x target grows
    /// by 20%. Memory pressure above the limit shrinks by 30% regardless.
    /// With no successful samples yet, `current` is returned unchanged.
    pub fn recommend(&self, current: u32, memory_percent: Option<f32>) -> u32 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return current.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        }

        let recent: Vec<&BatchSample> = samples
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .filter(|s| s.success)
            .collect();
        if recent.is_empty() {
            return MIN_BATCH_SIZE;
        }

        let avg_secs =
            recent.iter().map(|s| s.duration.as_secs_f64()).sum::<f64>() / recent.len() as f64;
        let target_secs = self.target.as_secs_f64();

        let mut next = if avg_secs > target_secs * 1.2 {
            current as f64 * 0.8
        } else if avg_secs < target_secs * 0.8 {
            current as f64 * 1.2
        } else {
            current as f64
        };

        if let Some(memory) = memory_percent
            && memory > self.max_memory_percent
        {
            next = current as f64 * 0.7;
        }

        (next as u32).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }
}
