//! Vsync timing
//!
//! The remote side reports when it last finished transmitting a frame and
//! how many it has sent. Once per present the reconciler realigns the local
//! virtual vsync grid to that reference, shifted back by the configured
//! additional latency, and advances to the next vsync after "now".
//!
//! The reconciler is the only writer of [`TimingSnapshot`]; readers take a
//! consistent copy under the lock.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::trace;

use crate::types::time_in_seconds;

/// Authoritative vsync state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSnapshot {
    /// Time of the last virtual vsync, seconds
    pub last_vsync_time: f64,
    /// Vsyncs elapsed since start; never decreases
    pub vsync_counter: u64,
    /// Seconds per frame (denominator / numerator)
    pub frame_interval: f64,
    /// Encode + transmit latency subtracted from the remote reference, seconds
    pub additional_latency: f64,
}

/// Remote timing reference
pub trait VsyncSource: Send + Sync {
    /// Time of the last remote vsync (seconds) and the remote frame counter
    fn last_vsync(&self) -> (f64, u64);
}

/// Timing reference advanced by the encoder each time a frame is transmitted
#[derive(Debug)]
pub struct TransmitClock {
    state: Mutex<(f64, u64)>,
}

impl TransmitClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((time_in_seconds(), 0)),
        }
    }

    /// Record a transmit at the current time
    pub fn record(&self) {
        self.record_at(time_in_seconds());
    }

    /// Record a transmit at `now` (seconds)
    pub fn record_at(&self, now: f64) {
        let mut state = self.state.lock();
        state.0 = now;
        state.1 += 1;
    }
}

impl Default for TransmitClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VsyncSource for TransmitClock {
    fn last_vsync(&self) -> (f64, u64) {
        *self.state.lock()
    }
}

/// Keeps the local vsync grid aligned with the remote reference
pub struct VsyncReconciler {
    source: Arc<dyn VsyncSource>,
    state: RwLock<TimingSnapshot>,
}

impl VsyncReconciler {
    /// Reconciler starting its grid at the current time
    pub fn new(source: Arc<dyn VsyncSource>, frame_interval: f64, additional_latency: f64) -> Self {
        Self::starting_at(source, frame_interval, additional_latency, time_in_seconds())
    }

    /// Reconciler whose grid starts at `start` (seconds)
    pub fn starting_at(
        source: Arc<dyn VsyncSource>,
        frame_interval: f64,
        additional_latency: f64,
        start: f64,
    ) -> Self {
        Self {
            source,
            state: RwLock::new(TimingSnapshot {
                last_vsync_time: start,
                vsync_counter: 0,
                frame_interval,
                additional_latency: additional_latency.max(0.0),
            }),
        }
    }

    /// Realign against the remote reference and advance to the next vsync
    pub fn update(&self) -> TimingSnapshot {
        self.update_at(time_in_seconds())
    }

    /// [`update`](Self::update) with an explicit current time
    pub fn update_at(&self, now: f64) -> TimingSnapshot {
        let (remote_time, remote_counter) = self.source.last_vsync();

        let mut state = self.state.write();
        let interval = state.frame_interval;
        let reference = remote_time - state.additional_latency;

        let ref_to_last = ((state.last_vsync_time - reference) / interval).round();
        let last = reference + interval * ref_to_last;

        let last_to_next = ((now - last) / interval).floor().max(0.0) + 1.0;
        state.last_vsync_time = last + interval * last_to_next;

        let counter = remote_counter as i64 + ref_to_last as i64 + last_to_next as i64;
        state.vsync_counter = state.vsync_counter.max(counter.max(0) as u64);

        trace!(
            "Vsync realigned: last={:.6} counter={} (ref {} + {} + {})",
            state.last_vsync_time,
            state.vsync_counter,
            remote_counter,
            ref_to_last,
            last_to_next
        );
        *state
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> TimingSnapshot {
        *self.state.read()
    }

    /// Seconds since the last virtual vsync and the vsync counter
    pub fn time_since_last_vsync(&self) -> (f64, u64) {
        let state = self.state.read();
        (time_in_seconds() - state.last_vsync_time, state.vsync_counter)
    }

    /// Earliest time the frame presented now should be displayed
    pub fn target_vsync(&self) -> f64 {
        let state = self.state.read();
        state.last_vsync_time + state.additional_latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(f64, u64);

    impl VsyncSource for FixedSource {
        fn last_vsync(&self) -> (f64, u64) {
            (self.0, self.1)
        }
    }

    const INTERVAL: f64 = 1.0 / 60.0;

    #[test]
    fn test_advances_to_next_vsync() {
        let reconciler = VsyncReconciler::starting_at(Arc::new(FixedSource(100.0, 10)), INTERVAL, 0.0, 100.0);

        // 2.5 intervals after the reference: next vsync is the third
        let snap = reconciler.update_at(100.0 + 2.5 * INTERVAL);
        assert!((snap.last_vsync_time - (100.0 + 3.0 * INTERVAL)).abs() < 1e-9);
        assert_eq!(snap.vsync_counter, 13);
    }

    #[test]
    fn test_additional_latency_shifts_reference() {
        let reconciler = VsyncReconciler::starting_at(
            Arc::new(FixedSource(100.0, 0)),
            INTERVAL,
            0.5 * INTERVAL,
            100.0 - 0.5 * INTERVAL,
        );
        let snap = reconciler.update_at(100.0);
        // Grid is shifted half a frame earlier
        assert!((snap.last_vsync_time - (100.0 + 0.5 * INTERVAL)).abs() < 1e-9);
    }

    #[test]
    fn test_counter_never_decreases() {
        let source = Arc::new(TransmitClock::new());
        source.record_at(50.0);
        let reconciler = VsyncReconciler::starting_at(source.clone(), INTERVAL, 0.0, 50.0);
        let first = reconciler.update_at(51.0).vsync_counter;

        // Remote reference jumps backwards in time
        source.record_at(10.0);
        let second = reconciler.update_at(51.0).vsync_counter;
        assert!(second >= first);
    }

    #[test]
    fn test_transmit_clock_counts() {
        let clock = TransmitClock::new();
        clock.record_at(1.0);
        clock.record_at(2.0);
        assert_eq!(clock.last_vsync(), (2.0, 2));
    }
}
