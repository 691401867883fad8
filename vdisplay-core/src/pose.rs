//! Pose correlation
//!
//! The host hands back only the pose a layer was rendered with. To report
//! tracking latency the frame has to be matched to the tracking sample that
//! produced it, which is done by comparing rotations against a short history
//! of recent samples.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

use crate::types::{Matrix34, TrackingSample};

/// Samples kept for correlation
pub const HISTORY_CAPACITY: usize = 10;

/// Distance between a submitted pose and a tracking sample
pub trait DistanceMetric: Send + Sync {
    fn distance(&self, pose: &Matrix34, sample: &TrackingSample) -> f64;
}

/// Sum of squared differences between the pose's rotation block and the
/// left eye view rotation
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationDistance;

impl DistanceMetric for RotationDistance {
    fn distance(&self, pose: &Matrix34, sample: &TrackingSample) -> f64 {
        let view = &sample.eyes[0].view;
        let mut sum = 0.0;
        for row in 0..3 {
            for col in 0..3 {
                let d = (pose.rotation(row, col) - view.rotation(row, col)) as f64;
                sum += d * d;
            }
        }
        sum
    }
}

/// Bounded history of tracking samples
pub struct PoseCorrelator {
    history: Mutex<VecDeque<TrackingSample>>,
    metric: Box<dyn DistanceMetric>,
}

impl PoseCorrelator {
    pub fn new() -> Self {
        Self::with_metric(RotationDistance)
    }

    pub fn with_metric(metric: impl DistanceMetric + 'static) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            metric: Box::new(metric),
        }
    }

    /// Append `sample` unless it repeats the most recent frame index.
    /// Returns whether it was stored.
    pub fn record(&self, sample: TrackingSample) -> bool {
        let mut history = self.history.lock();
        if history.back().is_some_and(|last| last.frame_index == sample.frame_index) {
            return false;
        }
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(sample);
        true
    }

    /// Frame index and client time of the closest sample, or (0, 0) when
    /// the history is empty. Ties go to the oldest sample.
    pub fn correlate(&self, pose: &Matrix34) -> (u64, u64) {
        let history = self.history.lock();
        let mut best: Option<(f64, &TrackingSample)> = None;
        for sample in history.iter() {
            let distance = self.metric.distance(pose, sample);
            if best.is_none_or(|(min, _)| distance < min) {
                best = Some((distance, sample));
            }
        }
        match best {
            Some((distance, sample)) => {
                trace!(
                    "Pose matched frame {} (distance {:.6})",
                    sample.frame_index,
                    distance
                );
                (sample.frame_index, sample.client_time)
            }
            None => (0, 0),
        }
    }

    /// Stored frame indices, oldest first
    pub fn frame_indices(&self) -> Vec<u64> {
        self.history.lock().iter().map(|s| s.frame_index).collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }
}

impl Default for PoseCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
