//! vdisplay Core Library
//!
//! Virtual head-mounted display driver: takes the frames a compositor
//! presents, encodes them and streams them to a remote display.
//!
//! This library provides:
//! - Single-layer and layered (side-by-side stereo) presentation paths
//! - A dedicated encode worker overlapping encode/transmit with rendering
//! - NVENC encoding through FFmpeg (feature `nvenc`) or raw passthrough
//! - Vsync pacing reconciled against the remote display's timing
//! - Pose correlation for tracking latency accounting
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌───────────────┐    ┌──────────────┐    ┌───────────┐
//! │ Host present │───▶│ Staging       │───▶│ Encode worker│───▶│ Transport │
//! │ (GPU texture)│    │ (copy / SBS)  │    │ (NVENC / raw)│    │ (UDP)     │
//! └──────────────┘    └───────────────┘    └──────────────┘    └───────────┘
//! ```

pub mod config;
pub mod display;
pub mod driver;
pub mod encode;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod performance;
pub mod pose;
pub mod staging;
pub mod timing;
pub mod transport;
pub mod types;
pub mod vsync;
pub mod worker;

pub use config::{Codec, DriverConfig, EncoderOptions, PipelineMode};
pub use display::{DirectModeDisplay, DisplaySurface, VirtualDisplay};
pub use driver::{Driver, DriverState, HostRuntime};
pub use encode::{EncodedPacket, EncoderAdapter, EncoderBackend};
pub use error::{DisplayError, Result};
pub use gpu::{GpuDevice, PixelFormat, SoftwareDevice};
pub use transport::{Transport, UdpTransport};
pub use types::{DriverPose, FrameSubmission, TrackingSample};
