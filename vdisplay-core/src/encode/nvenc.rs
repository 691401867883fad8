//! NVENC encoder backend via FFmpeg
//!
//! Provides H.264 and HEVC encoding on NVIDIA GPUs. Input surfaces are read
//! back and uploaded into an FFmpeg frame in their native layout (NV12 or
//! packed RGB); the encoder is opened for that pixel format directly.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Dictionary, Rational};
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::{BackendConfig, BackendPacket, EncoderBackend};
use crate::error::{DisplayError, Result};
use crate::gpu::{GpuDevice, PixelFormat, Texture, TextureDesc};

struct Session {
    device: Arc<dyn GpuDevice>,
    readback: Arc<Texture>,
    encoder: encoder::video::Encoder,
    frame: Video,
    packet: ffmpeg::Packet,
}

/// NVENC hardware encoder
pub struct NvencBackend {
    session: Option<Session>,
}

impl NvencBackend {
    pub fn new() -> Self {
        Self { session: None }
    }
}

impl Default for NvencBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn pixel_for(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Bgra8 => Pixel::BGRZ,
        PixelFormat::Rgba8 => Pixel::RGBZ,
        PixelFormat::Nv12 => Pixel::NV12,
    }
}

impl EncoderBackend for NvencBackend {
    fn name(&self) -> &str {
        "nvenc"
    }

    fn open(&mut self, device: Arc<dyn GpuDevice>, config: &BackendConfig) -> Result<()> {
        ffmpeg::init().map_err(|e| DisplayError::encoder(format!("FFmpeg init failed: {}", e)))?;

        let encoder_name = config.options.codec.nvenc_encoder().ok_or_else(|| {
            DisplayError::nvenc(format!("{} has no NVENC encoder", config.options.codec))
        })?;
        info!("Initializing encoder: {}", encoder_name);

        let codec = encoder::find_by_name(encoder_name)
            .ok_or_else(|| DisplayError::nvenc(format!("Encoder {} not found", encoder_name)))?;

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| DisplayError::nvenc(format!("Failed to create encoder context: {}", e)))?;

        let fps = config.fps.max(1) as i32;
        let bitrate = config.options.bitrate as usize;
        video.set_width(config.width);
        video.set_height(config.height);
        video.set_format(pixel_for(config.format));
        video.set_time_base(Rational::new(1, fps));
        video.set_frame_rate(Some(Rational::new(fps, 1)));
        video.set_bit_rate(bitrate);
        video.set_max_bit_rate(bitrate);
        if let Some(gop) = config.options.gop {
            video.set_gop(gop);
        }
        // No B-frames: one packet out per frame in
        video.set_max_b_frames(0);

        let mut opts = Dictionary::new();
        opts.set("preset", &config.options.preset);
        opts.set("rc", config.options.rate_control.nvenc_value());
        opts.set("zerolatency", "1");
        opts.set("delay", "0");
        for (key, value) in &config.options.extra {
            opts.set(key, value);
        }

        let encoder = video
            .open_with(opts)
            .map_err(|e| DisplayError::nvenc(format!("Failed to open encoder: {}", e)))?;

        info!(
            "NVENC encoder opened: {}x{} @ {}fps, {}kbps",
            config.width,
            config.height,
            fps,
            config.options.bitrate_kbps()
        );

        let readback = device.create_texture(&TextureDesc::new(config.width, config.height, config.format).staging())?;
        self.session = Some(Session {
            device,
            readback,
            encoder,
            frame: Video::new(pixel_for(config.format), config.width, config.height),
            packet: ffmpeg::Packet::empty(),
        });
        Ok(())
    }

    fn encode(&mut self, surface: &Texture, pts: u64) -> Result<Vec<BackendPacket>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DisplayError::nvenc("Encoder is not open"))?;

        session.device.copy_resource(&session.readback, surface)?;
        let pixels = session.device.map_read(&session.readback)?;
        upload(&mut session.frame, surface.format(), surface.width(), surface.height(), &pixels);

        session.frame.set_pts(Some(pts as i64));
        session
            .encoder
            .send_frame(&session.frame)
            .map_err(|e| DisplayError::nvenc(format!("Failed to send frame: {}", e)))?;

        receive_packets(session)
    }

    fn flush(&mut self) -> Result<Vec<BackendPacket>> {
        let Some(mut session) = self.session.take() else {
            return Ok(Vec::new());
        };
        session
            .encoder
            .send_eof()
            .map_err(|e| DisplayError::nvenc(format!("Failed to send EOF: {}", e)))?;
        let packets = receive_packets(&mut session)?;
        debug!("NVENC flushed {} packets", packets.len());
        Ok(packets)
    }
}

/// Copy tightly packed surface rows into the frame's strided planes
fn upload(frame: &mut Video, format: PixelFormat, width: u32, height: u32, pixels: &[u8]) {
    let (w, h) = (width as usize, height as usize);
    let planes: Vec<(usize, usize)> = match format {
        PixelFormat::Nv12 => vec![(w, h), (2 * w.div_ceil(2), h.div_ceil(2))],
        PixelFormat::Bgra8 | PixelFormat::Rgba8 => vec![(w * 4, h)],
    };

    let mut offset = 0;
    for (plane, (row_bytes, rows)) in planes.into_iter().enumerate() {
        let stride = frame.stride(plane);
        let dst = frame.data_mut(plane);
        for row in 0..rows {
            let src = &pixels[offset + row * row_bytes..offset + (row + 1) * row_bytes];
            dst[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }
        offset += row_bytes * rows;
    }
}

fn receive_packets(session: &mut Session) -> Result<Vec<BackendPacket>> {
    let mut packets = Vec::new();
    loop {
        match session.encoder.receive_packet(&mut session.packet) {
            Ok(()) => {
                let packet = BackendPacket {
                    data: Bytes::copy_from_slice(session.packet.data().unwrap_or_default()),
                    pts: session.packet.pts().unwrap_or(0).max(0) as u64,
                    keyframe: session.packet.is_key(),
                };
                trace!(
                    "Encoded packet: pts={}, size={}, keyframe={}",
                    packet.pts,
                    packet.data.len(),
                    packet.keyframe
                );
                packets.push(packet);
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(DisplayError::nvenc(format!("Failed to receive packet: {}", e)));
            }
        }
    }
    Ok(packets)
}

/// Check if an NVENC encoder is present in the FFmpeg build
pub fn check_nvenc_available() -> bool {
    ffmpeg::init().ok();
    encoder::find_by_name("h264_nvenc").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Codec, EncoderOptions};
    use crate::gpu::SoftwareDevice;

    #[test]
    fn test_pixel_mapping() {
        assert_eq!(pixel_for(PixelFormat::Nv12), Pixel::NV12);
        assert_eq!(pixel_for(PixelFormat::Bgra8), Pixel::BGRZ);
    }

    #[test]
    fn test_raw_codec_has_no_nvenc_encoder() {
        let mut backend = NvencBackend::new();
        let config = BackendConfig {
            width: 64,
            height: 64,
            format: PixelFormat::Nv12,
            fps: 60,
            options: EncoderOptions::default().with_codec(Codec::Raw),
        };
        assert!(backend.open(Arc::new(SoftwareDevice::new()), &config).is_err());
    }

    #[test]
    #[ignore = "Requires NVENC hardware"]
    fn test_encode_and_flush() {
        let device = Arc::new(SoftwareDevice::new());
        let mut backend = NvencBackend::new();
        let config = BackendConfig {
            width: 256,
            height: 256,
            format: PixelFormat::Nv12,
            fps: 60,
            options: EncoderOptions::default(),
        };
        backend.open(device.clone(), &config).unwrap();
        let surface = device
            .create_texture(&TextureDesc::new(256, 256, PixelFormat::Nv12))
            .unwrap();

        let mut total = 0;
        for pts in 0..10 {
            total += backend.encode(&surface, pts).unwrap().len();
        }
        total += backend.flush().unwrap().len();
        assert_eq!(total, 10);
    }
}
