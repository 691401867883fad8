//! Mock infrastructure for testing
//!
//! Stand-ins for the host runtime, the network transport and a buffering
//! hardware encoder, plus helpers for solid-colour textures.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use vdisplay_core::driver::HostRuntime;
use vdisplay_core::encode::{BackendConfig, BackendPacket, EncoderBackend};
use vdisplay_core::error::{DisplayError, Result};
use vdisplay_core::gpu::{GpuDevice, PixelFormat, Region, ShareMode, Texture, TextureDesc};
use vdisplay_core::transport::Transport;
use vdisplay_core::types::{DriverPose, TrackingSample};

/// One call to [`Transport::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub data: Vec<u8>,
    pub presentation_time: u64,
    pub frame_index: u64,
}

/// Transport that records every packet and serves a settable sample
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentPacket>>,
    sample: Mutex<Option<TrackingSample>>,
    fail_sends: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_sample(&self, sample: TrackingSample) {
        *self.sample.lock() = Some(sample);
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock() = fail;
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Poll until at least `count` packets were sent or `timeout` elapses
    pub fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sent_count() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.sent_count() >= count
    }
}

impl Transport for MockTransport {
    fn send(&self, data: &[u8], presentation_time: u64, frame_index: u64) -> Result<()> {
        if *self.fail_sends.lock() {
            return Err(DisplayError::transport("mock send failure"));
        }
        self.sent.lock().push(SentPacket {
            data: data.to_vec(),
            presentation_time,
            frame_index,
        });
        Ok(())
    }

    fn has_tracking_sample(&self) -> bool {
        self.sample.lock().is_some()
    }

    fn latest_tracking_sample(&self) -> Option<TrackingSample> {
        *self.sample.lock()
    }

    fn client_to_server_time(&self, client_time: u64) -> u64 {
        client_time
    }
}

/// Host that counts callbacks
#[derive(Default)]
pub struct MockHost {
    vsyncs: AtomicU32,
    poses: AtomicU32,
    last_pose: Mutex<Option<DriverPose>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn vsync_count(&self) -> u32 {
        self.vsyncs.load(Ordering::SeqCst)
    }

    pub fn pose_count(&self) -> u32 {
        self.poses.load(Ordering::SeqCst)
    }

    pub fn last_pose(&self) -> Option<DriverPose> {
        *self.last_pose.lock()
    }
}

impl HostRuntime for MockHost {
    fn vsync_event(&self) {
        self.vsyncs.fetch_add(1, Ordering::SeqCst);
    }

    fn pose_updated(&self, pose: &DriverPose) {
        self.poses.fetch_add(1, Ordering::SeqCst);
        *self.last_pose.lock() = Some(*pose);
    }
}

/// Observable state of a [`BufferingEncoder`]
#[derive(Debug, Default)]
pub struct EncoderLog {
    pub opened: Option<(u32, u32, PixelFormat)>,
    pub encoded: Vec<u64>,
    pub flushed: bool,
}

/// Encoder that emits each input `delay` frames late. Packet payloads are
/// the little-endian pts so tests can tell packets apart.
pub struct BufferingEncoder {
    delay: usize,
    queue: VecDeque<u64>,
    fail_pts: Option<u64>,
    log: Arc<Mutex<EncoderLog>>,
}

impl BufferingEncoder {
    pub fn new(delay: usize) -> (Self, Arc<Mutex<EncoderLog>>) {
        let log = Arc::new(Mutex::new(EncoderLog::default()));
        (
            Self {
                delay,
                queue: VecDeque::new(),
                fail_pts: None,
                log: log.clone(),
            },
            log,
        )
    }

    /// Fail the encode of input `pts`
    pub fn failing_at(mut self, pts: u64) -> Self {
        self.fail_pts = Some(pts);
        self
    }

    fn packet(pts: u64) -> BackendPacket {
        BackendPacket {
            data: Bytes::copy_from_slice(&pts.to_le_bytes()),
            pts,
            keyframe: pts == 0,
        }
    }
}

impl EncoderBackend for BufferingEncoder {
    fn name(&self) -> &str {
        "buffering-mock"
    }

    fn open(&mut self, _device: Arc<dyn GpuDevice>, config: &BackendConfig) -> Result<()> {
        self.log.lock().opened = Some((config.width, config.height, config.format));
        Ok(())
    }

    fn encode(&mut self, _surface: &Texture, pts: u64) -> Result<Vec<BackendPacket>> {
        if self.fail_pts == Some(pts) {
            return Err(DisplayError::encoder(format!("mock failure at pts {}", pts)));
        }
        self.log.lock().encoded.push(pts);
        self.queue.push_back(pts);

        let mut ready = Vec::new();
        while self.queue.len() > self.delay {
            if let Some(pts) = self.queue.pop_front() {
                ready.push(Self::packet(pts));
            }
        }
        Ok(ready)
    }

    fn flush(&mut self) -> Result<Vec<BackendPacket>> {
        self.log.lock().flushed = true;
        Ok(self.queue.drain(..).map(Self::packet).collect())
    }
}

/// Texture filled with one BGRA colour
pub fn solid_texture(device: &dyn GpuDevice, width: u32, height: u32, bgra: [u8; 4]) -> Arc<Texture> {
    let texture = device
        .create_texture(
            &TextureDesc::new(width, height, PixelFormat::Bgra8)
                .render_target()
                .shader_resource(),
        )
        .unwrap();
    fill(device, &texture, bgra);
    texture
}

/// Shared, keyed-mutex guarded backbuffer filled with one BGRA colour
pub fn shared_backbuffer(device: &dyn GpuDevice, width: u32, height: u32, bgra: [u8; 4]) -> Arc<Texture> {
    let texture = device
        .create_texture(
            &TextureDesc::new(width, height, PixelFormat::Bgra8)
                .render_target()
                .shader_resource()
                .shared(ShareMode::KeyedMutex),
        )
        .unwrap();
    fill(device, &texture, bgra);
    texture
}

/// Overwrite every pixel of a packed texture
pub fn fill(device: &dyn GpuDevice, texture: &Texture, bgra: [u8; 4]) {
    let (w, h) = (texture.width(), texture.height());
    let pixels: Vec<u8> = bgra.iter().copied().cycle().take((w * h * 4) as usize).collect();
    device.update_region(texture, Region::new(0, 0, w, h), &pixels).unwrap();
}

/// CPU copy of a texture's contents
pub fn read_back(device: &dyn GpuDevice, texture: &Texture) -> Vec<u8> {
    let staging = device
        .create_texture(&TextureDesc::new(texture.width(), texture.height(), texture.format()).staging())
        .unwrap();
    device.copy_resource(&staging, texture).unwrap();
    device.map_read(&staging).unwrap()
}

/// BGRA pixel at (x, y) of a packed readback
pub fn pixel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]
}
