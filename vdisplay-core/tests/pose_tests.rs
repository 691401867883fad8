//! Integration tests for pose correlation and frame indexing

use std::sync::Arc;
use std::thread;

use vdisplay_core::pose::{DistanceMetric, HISTORY_CAPACITY, PoseCorrelator, RotationDistance};
use vdisplay_core::types::{DriverPose, FrameIndexer, Matrix34, Quaternion, TrackingSample};

fn yaw(radians: f64) -> Quaternion {
    let half = radians / 2.0;
    Quaternion::new(half.cos(), 0.0, half.sin(), 0.0)
}

fn pose_for(orientation: Quaternion) -> Matrix34 {
    Matrix34::from_rotation_translation(orientation.to_rotation(), [0.0; 3])
}

#[test]
fn test_duplicate_indices_are_dropped() {
    let correlator = PoseCorrelator::new();
    for index in [1, 1, 2, 3, 3, 3, 4] {
        correlator.record(TrackingSample::new(index, index * 1000));
    }
    assert_eq!(correlator.frame_indices(), vec![1, 2, 3, 4]);
}

#[test]
fn test_non_adjacent_repeat_is_kept() {
    let correlator = PoseCorrelator::new();
    assert!(correlator.record(TrackingSample::new(1, 0)));
    assert!(correlator.record(TrackingSample::new(2, 0)));
    assert!(correlator.record(TrackingSample::new(1, 0)));
    assert_eq!(correlator.frame_indices(), vec![1, 2, 1]);
}

#[test]
fn test_history_is_bounded() {
    let correlator = PoseCorrelator::new();
    for index in 0..100 {
        correlator.record(TrackingSample::new(index, 0));
        assert!(correlator.len() <= HISTORY_CAPACITY);
    }
    let indices = correlator.frame_indices();
    assert_eq!(indices.len(), HISTORY_CAPACITY);
    assert_eq!(indices.last(), Some(&99));
}

#[test]
fn test_empty_history_correlates_to_zero() {
    let correlator = PoseCorrelator::new();
    assert_eq!(correlator.correlate(&pose_for(yaw(0.4))), (0, 0));
}

#[test]
fn test_single_sample_always_matches() {
    let correlator = PoseCorrelator::new();
    correlator.record(TrackingSample::new(77, 123_456).with_orientation(yaw(1.0)));
    assert_eq!(correlator.correlate(&pose_for(yaw(-2.0))), (77, 123_456));
    assert_eq!(correlator.correlate(&Matrix34::IDENTITY), (77, 123_456));
}

#[test]
fn test_closest_rotation_wins() {
    let correlator = PoseCorrelator::new();
    for step in 0..8u64 {
        let sample = TrackingSample::new(step, step * 11).with_orientation(yaw(step as f64 * 0.1));
        correlator.record(sample);
    }
    // Between steps 4 and 5, nearer to 5
    assert_eq!(correlator.correlate(&pose_for(yaw(0.47))), (5, 55));
    // Translation plays no part
    let moved = Matrix34::from_rotation_translation(yaw(0.2).to_rotation(), [3.0, 1.0, -2.0]);
    assert_eq!(correlator.correlate(&moved), (2, 22));
}

#[test]
fn test_rotation_distance_is_zero_for_own_pose() {
    let sample = TrackingSample::new(1, 1).with_orientation(yaw(0.8));
    let distance = RotationDistance.distance(&pose_for(yaw(0.8)), &sample);
    assert!(distance < 1e-10);
    assert!(RotationDistance.distance(&pose_for(yaw(0.0)), &sample) > 0.1);
}

#[test]
fn test_concurrent_record_and_correlate() {
    let correlator = Arc::new(PoseCorrelator::new());
    let writer = {
        let correlator = correlator.clone();
        thread::spawn(move || {
            for index in 1..=1000u64 {
                correlator.record(TrackingSample::new(index, index));
            }
        })
    };
    for _ in 0..1000 {
        let (index, time) = correlator.correlate(&Matrix34::IDENTITY);
        assert_eq!(index, time);
        assert!(correlator.len() <= HISTORY_CAPACITY);
    }
    writer.join().unwrap();
    assert_eq!(correlator.frame_indices().last(), Some(&1000));
}

#[test]
fn test_indexer_is_strictly_increasing() {
    let mut indexer = FrameIndexer::new();
    let candidates = [5, 5, 6, 3, 10, 10, 0, 11];
    let issued: Vec<Option<u64>> = candidates.iter().map(|&c| indexer.next(c)).collect();
    assert_eq!(
        issued,
        vec![Some(5), None, Some(6), None, Some(10), None, None, Some(11)]
    );
    assert_eq!(indexer.last(), Some(11));
}

#[test]
fn test_indexer_never_renumbers_during_warm_up() {
    // Before the first tracking sample every frame references index 0
    let mut indexer = FrameIndexer::new();
    assert_eq!(indexer.next(0), Some(0));
    for _ in 0..10 {
        assert_eq!(indexer.next(0), None);
    }

    // Once samples arrive their indices are used as-is
    for index in [5, 6, 7] {
        assert_eq!(indexer.next(index), Some(index));
    }
    assert_eq!(indexer.last(), Some(7));
}

#[test]
fn test_driver_pose_from_sample() {
    let sample = TrackingSample::new(9, 90)
        .with_orientation(yaw(0.5))
        .with_position([0.1, 1.6, -0.2]);
    let pose = DriverPose::from_sample(&sample);
    assert_eq!(pose, DriverPose::from_sample(&sample));
    assert_ne!(pose, DriverPose::default());
}
