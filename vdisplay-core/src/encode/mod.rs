//! Hardware encoder adapter
//!
//! This module provides:
//! - [`EncoderAdapter`]: input surface pool, RGB to NV12 conversion and
//!   per-packet metadata over one encoder session
//! - [`EncoderBackend`]: the compression engine behind it
//! - [`RawBackend`]: passthrough backend used when NVENC is not built in
//! - NVENC via FFmpeg (feature `nvenc`)
//! - Debug timestamp overlay and raw packet dump

mod dump;
#[cfg(feature = "nvenc")]
mod nvenc;
mod overlay;
mod raw;

pub use dump::PacketDump;
#[cfg(feature = "nvenc")]
pub use nvenc::NvencBackend;
pub use overlay::{draw_digits, format_timestamp, TimestampOverlay};
pub use raw::RawBackend;

use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{Codec, DriverConfig, EncoderOptions, RefreshRate};
use crate::error::{DisplayError, Result, ResultExt};
use crate::gpu::{GpuDevice, Nv12Converter, PixelFormat, Texture, TextureDesc};
use crate::performance::PipelineMetrics;
use crate::timing::TransmitClock;
use crate::types::{timestamp_us, FrameSubmission};

/// Submissions remembered for packets the backend has not emitted yet
const MAX_PENDING: usize = 64;

/// One compressed access unit, tagged with the submission it was encoded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub presentation_time: u64,
    pub frame_index: u64,
    pub keyframe: bool,
}

/// Packet as emitted by a backend, keyed by the input pts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPacket {
    pub data: Bytes,
    pub pts: u64,
    pub keyframe: bool,
}

/// Session parameters handed to a backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub width: u32,
    pub height: u32,
    /// Format of the input surfaces
    pub format: PixelFormat,
    pub fps: u32,
    pub options: EncoderOptions,
}

/// Compression engine behind the adapter.
///
/// Backends may buffer input: `encode` returns whatever packets are ready,
/// which may belong to earlier pts values, and `flush` drains the rest.
pub trait EncoderBackend: Send {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Open the session
    fn open(&mut self, device: Arc<dyn GpuDevice>, config: &BackendConfig) -> Result<()>;

    /// Encode one input surface
    fn encode(&mut self, surface: &Texture, pts: u64) -> Result<Vec<BackendPacket>>;

    /// Drain buffered packets; the session is finished afterwards
    fn flush(&mut self) -> Result<Vec<BackendPacket>>;
}

/// Whether the NVENC backend is compiled in and finds an encoder
pub fn nvenc_available() -> bool {
    #[cfg(feature = "nvenc")]
    {
        nvenc::check_nvenc_available()
    }
    #[cfg(not(feature = "nvenc"))]
    {
        false
    }
}

/// Backend for a codec: NVENC when built in, raw otherwise
pub fn default_backend(codec: Codec) -> Box<dyn EncoderBackend> {
    #[cfg(feature = "nvenc")]
    if codec != Codec::Raw {
        return Box::new(NvencBackend::new());
    }
    if codec != Codec::Raw {
        warn!("{} requested but NVENC support is not built in; sending raw frames", codec);
    }
    Box::new(RawBackend::new())
}

/// Encoder session parameters
#[derive(Debug, Clone)]
pub struct EncodeParams {
    pub options: EncoderOptions,
    pub width: u32,
    pub height: u32,
    /// Input surface format; NV12 enables conversion
    pub format: PixelFormat,
    pub refresh: RefreshRate,
    pub input_surfaces: u32,
}

impl EncodeParams {
    /// Parameters for a `width`x`height` stream from the driver config
    pub fn from_config(config: &DriverConfig, width: u32, height: u32) -> Self {
        Self {
            options: config.encoder.clone(),
            width,
            height,
            format: config.pixel_format,
            refresh: config.refresh,
            input_surfaces: config.input_surfaces,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DisplayError::invalid(format!(
                "Encoder size {}x{}",
                self.width, self.height
            )));
        }
        if !self.refresh.is_valid() {
            return Err(DisplayError::invalid(format!(
                "Refresh rate {}/{}",
                self.refresh.numerator, self.refresh.denominator
            )));
        }
        if self.input_surfaces == 0 {
            return Err(DisplayError::invalid("Encoder needs at least one input surface"));
        }
        Ok(())
    }

    fn fps(&self) -> u32 {
        self.options
            .fps
            .unwrap_or_else(|| self.refresh.hz().round().max(1.0) as u32)
    }
}

struct Session {
    surfaces: Vec<Arc<Texture>>,
    next_surface: usize,
    converter: Option<Nv12Converter>,
    next_pts: u64,
    pending: BTreeMap<u64, FrameSubmission>,
    last_submission: Option<FrameSubmission>,
    dump: Option<PacketDump>,
}

impl Session {
    /// Attach the originating submission's metadata to a backend packet
    fn tag(&self, packet: BackendPacket) -> EncodedPacket {
        let submission = match self.pending.get(&packet.pts) {
            Some(submission) => Some(submission),
            None => {
                debug!("No submission for pts {}, using the latest", packet.pts);
                self.last_submission.as_ref()
            }
        };
        let (presentation_time, frame_index) = submission
            .map(|s| (s.presentation_time, s.frame_index))
            .unwrap_or((0, 0));
        EncodedPacket {
            data: packet.data,
            presentation_time,
            frame_index,
            keyframe: packet.keyframe,
        }
    }

    fn finish(&mut self, packets: Vec<BackendPacket>) -> Vec<EncodedPacket> {
        let tagged: Vec<EncodedPacket> = packets.into_iter().map(|p| self.tag(p)).collect();
        if let Some(dump) = &mut self.dump {
            for packet in &tagged {
                dump.write(&packet.data);
            }
        }
        tagged
    }
}

/// Wraps one encoder session for the lifetime of the pipeline
pub struct EncoderAdapter {
    device: Arc<dyn GpuDevice>,
    backend: Box<dyn EncoderBackend>,
    session: Option<Session>,
    initialized: bool,
    overlay: Option<TimestampOverlay>,
    dump_path: Option<PathBuf>,
    clock: Option<Arc<TransmitClock>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl EncoderAdapter {
    pub fn new(device: Arc<dyn GpuDevice>, backend: Box<dyn EncoderBackend>) -> Self {
        Self {
            device,
            backend,
            session: None,
            initialized: false,
            overlay: None,
            dump_path: None,
            clock: None,
            metrics: None,
        }
    }

    /// Append every packet to `path`
    pub fn with_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(path.into());
        self
    }

    /// Stamp the wall-clock time onto frames before encoding
    pub fn with_debug_timestamp(mut self, enabled: bool) -> Self {
        self.overlay = enabled.then(TimestampOverlay::new);
        self
    }

    /// Advance `clock` on every transmit
    pub fn with_transmit_clock(mut self, clock: Arc<TransmitClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether a session is open
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Open the session and create the input surface pool.
    ///
    /// Parameters are checked before anything is created. The pool exists
    /// once per adapter; a second call fails.
    pub fn initialize(&mut self, params: &EncodeParams) -> Result<()> {
        params.validate()?;
        if self.initialized {
            return Err(DisplayError::AlreadyCreated("encoder input surfaces"));
        }

        let config = BackendConfig {
            width: params.width,
            height: params.height,
            format: params.format,
            fps: params.fps(),
            options: params.options.clone(),
        };
        let mut surfaces = Vec::with_capacity(params.input_surfaces as usize);
        for _ in 0..params.input_surfaces {
            let surface = self
                .device
                .create_texture(&TextureDesc::new(params.width, params.height, params.format))
                .context("Failed to create encoder input surface")?;
            surfaces.push(surface);
        }

        let dump = match &self.dump_path {
            Some(path) => Some(PacketDump::create(path)?),
            None => None,
        };

        // Last, so a failure above leaves no backend session behind
        self.backend
            .open(self.device.clone(), &config)
            .context("Failed to open encoder")?;

        info!(
            "Encoder initialized: {} {}x{} {} @ {}fps, {} input surfaces",
            self.backend.name(),
            params.width,
            params.height,
            params.format,
            config.fps,
            surfaces.len()
        );

        self.session = Some(Session {
            surfaces,
            next_surface: 0,
            converter: None,
            next_pts: 0,
            pending: BTreeMap::new(),
            last_submission: None,
            dump,
        });
        self.initialized = true;
        Ok(())
    }

    /// Encode `staged` and return the packets that became ready.
    ///
    /// Packets carry the metadata of the submission whose surface produced
    /// them, which may be an earlier one when the backend buffers.
    pub fn transmit(&mut self, staged: &Texture, submission: FrameSubmission) -> Result<Vec<EncodedPacket>> {
        let Some(session) = self.session.as_mut() else {
            return Err(DisplayError::Stopped);
        };
        let start = Instant::now();

        if let Some(overlay) = &mut self.overlay {
            if let Err(e) = overlay.stamp_now(self.device.as_ref(), staged) {
                warn!("Timestamp overlay skipped: {}", e);
            }
        }

        let surface = session.surfaces[session.next_surface].clone();
        session.next_surface = (session.next_surface + 1) % session.surfaces.len();

        if surface.format().is_planar() {
            if session.converter.is_none() {
                session.converter = Some(Nv12Converter::new(
                    self.device.clone(),
                    surface.width(),
                    surface.height(),
                    staged.format(),
                )?);
            }
            if let Some(converter) = &mut session.converter {
                converter.convert(staged, &surface)?;
            }
        } else {
            self.device.copy_resource(&surface, staged)?;
        }

        let pts = session.next_pts;
        session.next_pts += 1;
        session.pending.insert(pts, submission);
        session.last_submission = Some(submission);
        while session.pending.len() > MAX_PENDING {
            session.pending.pop_first();
        }

        let packets = self.backend.encode(&surface, pts)?;
        let packets = session.finish(packets);

        if let Some(clock) = &self.clock {
            clock.record();
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_encoding_delay_us(timestamp_us().saturating_sub(submission.presentation_time));
        }

        trace!(
            "Transmit frame {} (pts {}): {} packets in {:?}",
            submission.frame_index,
            pts,
            packets.len(),
            start.elapsed()
        );
        Ok(packets)
    }

    /// Flush buffered packets and release the session.
    ///
    /// Calling it again, or before [`initialize`](Self::initialize), returns
    /// no packets.
    pub fn shutdown(&mut self) -> Result<Vec<EncodedPacket>> {
        let Some(mut session) = self.session.take() else {
            return Ok(Vec::new());
        };
        let packets = self.backend.flush().context("Encoder flush failed")?;
        let packets = session.finish(packets);
        if let Some(dump) = &mut session.dump {
            dump.flush()?;
        }
        info!("Encoder shut down, {} packets flushed", packets.len());
        Ok(packets)
    }
}

impl Drop for EncoderAdapter {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("Encoder shutdown on drop failed: {}", e);
            }
        }
    }
}
