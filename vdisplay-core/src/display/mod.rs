//! Display surfaces
//!
//! The host presents frames in one of two ways, chosen once at startup:
//! - [`VirtualDisplay`]: the compositor hands over one finished backbuffer
//!   per frame
//! - [`DirectModeDisplay`]: the compositor submits a per-eye layer from swap
//!   texture sets it allocated through us, then presents
//!
//! Both stage the frame for the encode worker through a
//! [`StagingCompositor`](crate::staging::StagingCompositor).

mod direct;
mod virtual_display;

pub use direct::DirectModeDisplay;
pub use virtual_display::VirtualDisplay;

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{DriverConfig, PipelineMode, WindowBounds};
use crate::error::Result;
use crate::gpu::SharedHandle;
use crate::performance::PipelineMetrics;
use crate::types::{Eye, FrameIndexer};
use crate::worker::EncodeWorker;

/// How long a present waits for the compositor to release a shared texture
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(10);

/// Side of the CPU-readable texture used to wait for rendering
pub const FLUSH_PROBE_SIZE: u32 = 32;

/// Output rectangle in window pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Tangents of the half-angles of an eye's frustum
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectionRaw {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

/// Per-channel distortion lookup result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistortionCoordinates {
    pub red: [f32; 2],
    pub green: [f32; 2],
    pub blue: [f32; 2],
}

/// Static display description reported to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayProperties {
    pub window: WindowBounds,
    pub render_width: u32,
    pub render_height: u32,
    pub ipd: f32,
    pub display_frequency: f32,
    pub seconds_from_vsync_to_photons: f32,
}

impl DisplayProperties {
    pub fn from_config(config: &DriverConfig) -> Self {
        Self {
            window: config.window,
            render_width: config.render_width,
            render_height: config.render_height,
            ipd: config.ipd,
            display_frequency: config.display_frequency,
            seconds_from_vsync_to_photons: config.seconds_from_vsync_to_photons,
        }
    }

    /// Per-eye render target size the host should use
    pub fn recommended_render_target_size(&self) -> (u32, u32) {
        (self.render_width, self.render_height)
    }

    /// Left eye on the left half of the window, right eye on the right half
    pub fn eye_output_viewport(&self, eye: Eye) -> Viewport {
        let half = self.window.width / 2;
        Viewport {
            x: half * eye.index() as u32,
            y: 0,
            width: half,
            height: self.window.height,
        }
    }

    /// Symmetric unit frustum for both eyes
    pub fn projection_raw(&self, _eye: Eye) -> ProjectionRaw {
        ProjectionRaw {
            left: -1.0,
            right: 1.0,
            top: -1.0,
            bottom: 1.0,
        }
    }

    /// No lens distortion: every channel samples where it lands
    pub fn compute_distortion(&self, _eye: Eye, u: f32, v: f32) -> DistortionCoordinates {
        DistortionCoordinates {
            red: [u, v],
            green: [u, v],
            blue: [u, v],
        }
    }
}

/// Pipeline state a present needs from the driver
pub struct FrameContext<'a> {
    pub worker: &'a EncodeWorker,
    pub indexer: &'a mut FrameIndexer,
    pub metrics: &'a PipelineMetrics,
    /// Frame index and client time of the sample last handed to the host
    pub reference: (u64, u64),
    /// Vsync the frame is aimed at, seconds
    pub target_vsync: f64,
}

impl FrameContext<'_> {
    /// Claim the frame index for a frame rendered against tracking sample
    /// `reference`. A stale reference is counted as a drop and yields None.
    pub fn claim_index(&mut self, reference: u64) -> Option<u64> {
        let index = self.indexer.next(reference);
        if index.is_none() {
            self.metrics.record_frame_dropped();
            debug!(
                "Dropping frame rendered against tracking index {} (last sent {:?})",
                reference,
                self.indexer.last()
            );
        }
        index
    }
}

/// Presentation path selected at construction
pub trait DisplaySurface: Send {
    fn mode(&self) -> PipelineMode;

    /// Static description reported to the host
    fn properties(&self) -> &DisplayProperties;

    /// Size of the staged frame, which is also the encoded size
    fn staging_size(&self) -> (u32, u32);

    /// Per-eye render target size
    fn recommended_size(&self) -> (u32, u32) {
        self.properties().recommended_render_target_size()
    }

    /// Stage the frame behind `handle` for encoding.
    ///
    /// Returns `Ok(false)` when the frame was dropped (sync timeout, nothing
    /// submitted, format mismatch).
    fn present(&mut self, handle: SharedHandle, frame: FrameContext<'_>) -> Result<bool>;

    /// Block until the GPU has finished the last presented frame
    fn wait_for_present(&mut self) {}

    /// Layered presentation interface, when this is a direct mode display
    fn as_direct_mut(&mut self) -> Option<&mut DirectModeDisplay> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_viewports_split_window() {
        let config = DriverConfig::default();
        let props = DisplayProperties::from_config(&config);
        let left = props.eye_output_viewport(Eye::Left);
        let right = props.eye_output_viewport(Eye::Right);
        assert_eq!(left.x, 0);
        assert_eq!(right.x, config.window.width / 2);
        assert_eq!(left.width + right.width, config.window.width);
        assert_eq!(left.height, config.window.height);
    }

    #[test]
    fn test_identity_distortion() {
        let props = DisplayProperties::from_config(&DriverConfig::default());
        let d = props.compute_distortion(Eye::Right, 0.25, 0.75);
        assert_eq!(d.red, [0.25, 0.75]);
        assert_eq!(d.blue, d.green);
        assert_eq!(props.projection_raw(Eye::Left).left, -1.0);
    }
}
