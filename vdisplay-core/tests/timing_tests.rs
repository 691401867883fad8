//! Integration tests for vsync pacing

use std::sync::Arc;
use std::time::Duration;

use vdisplay_core::timing::{TransmitClock, VsyncReconciler, VsyncSource};
use vdisplay_core::vsync::{DEFAULT_VSYNC_INTERVAL, PeriodicTimer};

const INTERVAL: f64 = 1.0 / 90.0;

#[test]
fn test_counter_strictly_increases_with_fixed_reference() {
    let clock = Arc::new(TransmitClock::new());
    clock.record_at(500.0);
    let reconciler = VsyncReconciler::starting_at(clock, INTERVAL, 0.0, 500.0);

    let mut previous = reconciler.snapshot();
    // Irregular present cadence, including two presents inside one interval
    let offsets = [0.3, 1.1, 1.2, 2.9, 3.0, 5.7, 9.4, 9.5, 12.0];
    for offset in offsets {
        let now = 500.0 + offset * INTERVAL;
        let snap = reconciler.update_at(now);

        assert!(snap.vsync_counter > previous.vsync_counter);
        let elapsed = snap.last_vsync_time - previous.last_vsync_time;
        let counted = (snap.vsync_counter - previous.vsync_counter) as f64 * INTERVAL;
        assert!((elapsed - counted).abs() < 1e-9, "{} vs {}", elapsed, counted);
        assert!(snap.last_vsync_time > now);
        if now >= previous.last_vsync_time {
            // Caught up with the grid: the next vsync is within one interval
            assert!(snap.last_vsync_time - now <= INTERVAL + 1e-9);
        }
        previous = snap;
    }
}

#[test]
fn test_counter_tracks_advancing_reference() {
    let clock = Arc::new(TransmitClock::new());
    clock.record_at(0.0);
    let reconciler = VsyncReconciler::starting_at(clock.clone(), INTERVAL, 0.002, 0.0);

    let mut counters = Vec::new();
    for frame in 1..=30u32 {
        let now = frame as f64 * INTERVAL;
        // Remote transmits land a little late each frame
        clock.record_at(now - 0.25 * INTERVAL);
        counters.push(reconciler.update_at(now).vsync_counter);
    }

    assert!(counters.windows(2).all(|w| w[0] <= w[1]));
    let first = reconciler.snapshot();
    let later = reconciler.update_at(40.0 * INTERVAL);
    let counted = (later.vsync_counter - first.vsync_counter) as f64 * INTERVAL;
    let elapsed = later.last_vsync_time - first.last_vsync_time;
    assert!((counted - elapsed).abs() < INTERVAL);
}

#[test]
fn test_snapshot_matches_time_since_last_vsync() {
    let reconciler = VsyncReconciler::new(Arc::new(TransmitClock::new()), INTERVAL, 0.0);
    let snap = reconciler.update();
    let (since, counter) = reconciler.time_since_last_vsync();
    assert_eq!(counter, snap.vsync_counter);
    assert!(since < INTERVAL);
    assert!((reconciler.target_vsync() - snap.last_vsync_time).abs() < 1e-12);
}

#[test]
fn test_transmit_clock_is_vsync_source() {
    let clock = TransmitClock::new();
    let (_, count) = clock.last_vsync();
    assert_eq!(count, 0);
    clock.record();
    clock.record();
    assert_eq!(clock.last_vsync().1, 2);
}

#[test]
fn test_periodic_timer_rate() {
    let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = ticks.clone();
    let mut timer = PeriodicTimer::start(Duration::from_millis(10), move || {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    })
    .unwrap();

    std::thread::sleep(Duration::from_millis(105));
    timer.stop();
    let count = ticks.load(std::sync::atomic::Ordering::SeqCst);
    assert!((5..=11).contains(&count), "{} ticks", count);
    assert_eq!(timer.interval(), Duration::from_millis(10));
}

#[test]
fn test_default_interval_is_sixty_hertz() {
    assert_eq!(DEFAULT_VSYNC_INTERVAL.as_micros(), 16_666);
}
