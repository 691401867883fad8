//! Core types for vdisplay
//!
//! These types represent the data flowing through the present, encode and
//! tracking paths of the driver.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in microseconds since the Unix epoch.
///
/// Presentation times, tracking delays and client clock conversions all use
/// this timeline.
pub fn timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Current time in seconds on the same timeline as [`timestamp_us`].
pub fn time_in_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Which eye a per-eye query refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Index into per-eye arrays
    pub fn index(&self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

/// Metadata for one render submission.
///
/// Created at present time and consumed exactly once by the encode worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmission {
    /// Presentation timestamp in microseconds
    pub presentation_time: u64,
    /// Tracking frame index this submission was rendered for
    pub frame_index: u64,
    /// Client-side timestamp of the originating tracking sample
    pub client_time: u64,
    /// Number of source textures (1 = single layer, 2 = stereo pair)
    pub texture_count: u8,
}

impl FrameSubmission {
    /// Create a single-texture submission
    pub fn single(presentation_time: u64, frame_index: u64, client_time: u64) -> Self {
        Self {
            presentation_time,
            frame_index,
            client_time,
            texture_count: 1,
        }
    }

    /// Create a stereo (two-texture) submission
    pub fn stereo(presentation_time: u64, frame_index: u64, client_time: u64) -> Self {
        Self {
            presentation_time,
            frame_index,
            client_time,
            texture_count: 2,
        }
    }
}

/// Hands out frame indices that strictly increase across submissions.
///
/// Indices always come from the correlated tracking sample, so a client can
/// look the frame's pose back up. A frame rendered against a sample whose
/// index was already used gets no index at all and must not be sent.
#[derive(Debug, Default)]
pub struct FrameIndexer {
    last: Option<u64>,
}

impl FrameIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `candidate` if it advances past every index handed out so far
    pub fn next(&mut self, candidate: u64) -> Option<u64> {
        if self.last.is_some_and(|last| candidate <= last) {
            return None;
        }
        self.last = Some(candidate);
        Some(candidate)
    }

/// Last index handed out
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

/// Unit quaternion (w, x, y, z)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Euclidean norm
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Rotation matrix for this quaternion (row-major)
    pub fn to_rotation(&self) -> [[f32; 3]; 3] {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        [
            [
                (1.0 - 2.0 * (y * y + z * z)) as f32,
                (2.0 * (x * y - w * z)) as f32,
                (2.0 * (x * z + w * y)) as f32,
            ],
            [
                (2.0 * (x * y + w * z)) as f32,
                (1.0 - 2.0 * (x * x + z * z)) as f32,
                (2.0 * (y * z - w * x)) as f32,
            ],
            [
                (2.0 * (x * z - w * y)) as f32,
                (2.0 * (y * z + w * x)) as f32,
                (1.0 - 2.0 * (x * x + y * y)) as f32,
            ],
        ]
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 3x4 row-major transform: rotation block plus translation column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix34 {
    pub m: [[f32; 4]; 3],
}

impl Matrix34 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Build a transform from a rotation block and a translation
    pub fn from_rotation_translation(rotation: [[f32; 3]; 3], translation: [f32; 3]) -> Self {
        let mut m = [[0.0; 4]; 3];
        for (i, row) in m.iter_mut().enumerate() {
            row[..3].copy_from_slice(&rotation[i]);
            row[3] = translation[i];
        }
        Self { m }
    }

    /// Element of the 3x3 rotation block
    pub fn rotation(&self, row: usize, col: usize) -> f32 {
        self.m[row][col]
    }

    /// Translation column
    pub fn translation(&self) -> [f32; 3] {
        [self.m[0][3], self.m[1][3], self.m[2][3]]
    }
}

impl Default for Matrix34 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Column-major 4x4 matrix as delivered by the tracking source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix44 {
    pub m: [f32; 16],
}

impl Matrix44 {
    pub const IDENTITY: Self = Self {
        m: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Build a view matrix whose upper-left block is `rotation` (row-major input)
    pub fn from_rotation(rotation: [[f32; 3]; 3]) -> Self {
        let mut m = Self::IDENTITY.m;
        for (row, values) in rotation.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                m[col * 4 + row] = *value;
            }
        }
        Self { m }
    }

    /// Element of the rotation block at (row, col)
    pub fn rotation(&self, row: usize, col: usize) -> f32 {
        self.m[col * 4 + row]
    }
}

impl Default for Matrix44 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// View and projection for one eye
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeMatrices {
    pub view: Matrix44,
    pub projection: Matrix44,
}

/// One head-tracking sample reported by the remote device
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackingSample {
    /// Tracking frame index on the client
    pub frame_index: u64,
    /// Client timestamp for this sample
    pub client_time: u64,
    /// Head orientation
    pub orientation: Quaternion,
    /// Head position in meters
    pub position: [f32; 3],
    /// Per-eye view/projection
    pub eyes: [EyeMatrices; 2],
}

impl TrackingSample {
    /// Sample with identity eye matrices
    pub fn new(frame_index: u64, client_time: u64) -> Self {
        Self {
            frame_index,
            client_time,
            ..Default::default()
        }
    }

    /// Set the orientation and derive both eye view rotations from it
    pub fn with_orientation(mut self, orientation: Quaternion) -> Self {
        self.orientation = orientation;
        let view = Matrix44::from_rotation(orientation.to_rotation());
        for eye in &mut self.eyes {
            eye.view = view;
        }
        self
    }

    /// Set the head position
    pub fn with_position(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }
}

/// Tracking result reported with a pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingResult {
    RunningOk,
    Uninitialized,
}

/// Pose published to the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverPose {
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
    pub result: TrackingResult,
    pub world_from_driver_rotation: Quaternion,
    pub driver_from_head_rotation: Quaternion,
    pub rotation: Quaternion,
    pub position: [f64; 3],
    pub pose_time_offset: f64,
}

impl Default for DriverPose {
    fn default() -> Self {
        Self {
            pose_is_valid: true,
            device_is_connected: true,
            result: TrackingResult::RunningOk,
            world_from_driver_rotation: Quaternion::IDENTITY,
            driver_from_head_rotation: Quaternion::IDENTITY,
            rotation: Quaternion::IDENTITY,
            position: [0.0; 3],
            pose_time_offset: 0.0,
        }
    }
}

impl DriverPose {
    /// Pose derived from a tracking sample
    pub fn from_sample(sample: &TrackingSample) -> Self {
        Self {
            rotation: sample.orientation,
            position: [
                sample.position[0] as f64,
                sample.position[1] as f64,
                sample.position[2] as f64,
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_indexer_keeps_advancing_indices() {
        let mut indexer = FrameIndexer::new();
        assert_eq!(indexer.next(5), 5);
        assert_eq!(indexer.next(7), 7);
        assert_eq!(indexer.next(10), 10);
    }

    #[test]
    fn test_frame_indexer_bumps_repeats() {
        let mut indexer = FrameIndexer::new();
        assert_eq!(indexer.next(0), 0);
        assert_eq!(indexer.next(0), 1);
        assert_eq!(indexer.next(1), 2);
        assert_eq!(indexer.next(9), 9);
        assert_eq!(indexer.last(), Some(9));
    }

    #[test]
    fn test_identity_quaternion_rotation() {
        let r = Quaternion::IDENTITY.to_rotation();
        assert_eq!(r, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_matrix44_rotation_is_column_major() {
        let rotation = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let m = Matrix44::from_rotation(rotation);
        assert_eq!(m.rotation(0, 1), 2.0);
        assert_eq!(m.rotation(2, 0), 7.0);
        assert_eq!(m.m[1], 4.0);
    }

    #[test]
    fn test_pose_from_sample() {
        let sample = TrackingSample::new(3, 100)
            .with_orientation(Quaternion::new(0.0, 1.0, 0.0, 0.0))
            .with_position([1.0, 2.0, 3.0]);
        let pose = DriverPose::from_sample(&sample);
        assert_eq!(pose.rotation.x, 1.0);
        assert_eq!(pose.position, [1.0, 2.0, 3.0]);
        assert!(pose.pose_is_valid);
    }
}
