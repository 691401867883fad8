//! Passthrough backend
//!
//! Reads each input surface back to memory and emits it unchanged as one
//! packet. An optional delay holds packets back for a number of frames the
//! way a hardware encoder with lookahead would.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::{BackendConfig, BackendPacket, EncoderBackend};
use crate::error::{DisplayError, Result};
use crate::gpu::{GpuDevice, Texture, TextureDesc};

/// Uncompressed frames as packets
pub struct RawBackend {
    delay: usize,
    device: Option<Arc<dyn GpuDevice>>,
    readback: Option<Arc<Texture>>,
    queue: VecDeque<BackendPacket>,
}

impl RawBackend {
    pub fn new() -> Self {
        Self::with_delay(0)
    }

    /// Emit each frame `delay` frames late
    pub fn with_delay(delay: usize) -> Self {
        Self {
            delay,
            device: None,
            readback: None,
            queue: VecDeque::new(),
        }
    }
}

impl Default for RawBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for RawBackend {
    fn name(&self) -> &str {
        "raw"
    }

    fn open(&mut self, device: Arc<dyn GpuDevice>, config: &BackendConfig) -> Result<()> {
        let readback = device.create_texture(&TextureDesc::new(config.width, config.height, config.format).staging())?;
        debug!("Raw backend readback surface {}x{} {}", config.width, config.height, config.format);
        self.readback = Some(readback);
        self.device = Some(device);
        Ok(())
    }

    fn encode(&mut self, surface: &Texture, pts: u64) -> Result<Vec<BackendPacket>> {
        let (Some(device), Some(readback)) = (&self.device, &self.readback) else {
            return Err(DisplayError::encoder("Raw backend is not open"));
        };
        device.copy_resource(readback, surface)?;
        let data = device.map_read(readback)?;

        self.queue.push_back(BackendPacket {
            data: Bytes::from(data),
            pts,
            keyframe: true,
        });

        let mut ready = Vec::new();
        while self.queue.len() > self.delay {
            if let Some(packet) = self.queue.pop_front() {
                ready.push(packet);
            }
        }
        Ok(ready)
    }

    fn flush(&mut self) -> Result<Vec<BackendPacket>> {
        self.readback = None;
        self.device = None;
        Ok(self.queue.drain(..).collect())
    }
}
