//! Debug timestamp overlay
//!
//! Stamps the wall-clock time as `HH MM SS mmm uuu` onto a frame before it
//! is encoded, so end-to-end latency can be read off a photo of the remote
//! display next to a clock. Digits are a 3x5 bitmap font drawn at 2x scale.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DisplayError, Result};
use crate::gpu::{GpuDevice, Region, Texture, TextureDesc};

/// Top-left corner of the stamp
const ORIGIN: (u32, u32) = (10, 10);
/// Pixel scale applied to the 3x5 glyphs
const SCALE: u32 = 2;
/// Horizontal advance per character
const ADVANCE: u32 = 10;
/// `HH MM SS mmm uuu`
const STAMP_CHARS: u32 = 15;

/// Format microseconds since the epoch as `HH MM SS mmm uuu` (UTC)
pub fn format_timestamp(micros: u64) -> String {
    let secs = micros / 1_000_000;
    format!(
        "{:02} {:02} {:02} {:03} {:03}",
        secs / 3600 % 24,
        secs / 60 % 60,
        secs % 60,
        micros / 1000 % 1000,
        micros % 1000
    )
}

/// 3x5 bitmap for a digit, one row per byte (low 3 bits)
fn digit_bitmap(digit: u8) -> [u8; 5] {
    match digit {
        1 => [0b010, 0b110, 0b010, 0b010, 0b111],
        2 => [0b110, 0b101, 0b010, 0b100, 0b111],
        3 => [0b111, 0b001, 0b011, 0b001, 0b111],
        4 => [0b101, 0b101, 0b111, 0b001, 0b001],
        5 => [0b111, 0b100, 0b111, 0b001, 0b111],
        6 => [0b110, 0b100, 0b111, 0b101, 0b111],
        7 => [0b111, 0b001, 0b010, 0b010, 0b010],
        8 => [0b111, 0b101, 0b111, 0b101, 0b111],
        9 => [0b111, 0b101, 0b111, 0b001, 0b001],
        _ => [0b111, 0b101, 0b101, 0b101, 0b111],
    }
}

/// Draw `text` in white into a packed 4-byte-per-pixel buffer of `width` x `height`.
/// Spaces advance without drawing; pixels outside the buffer are clipped.
pub fn draw_digits(buf: &mut [u8], width: u32, height: u32, text: &str) {
    let stride = width as usize * 4;
    for (i, ch) in text.bytes().enumerate() {
        if !ch.is_ascii_digit() {
            continue;
        }
        let left = i as u32 * ADVANCE;
        for (row, bits) in digit_bitmap(ch - b'0').iter().enumerate() {
            for col in 0..3u32 {
                if (bits >> (2 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..SCALE {
                    for dx in 0..SCALE {
                        let x = left + col * SCALE + dx;
                        let y = row as u32 * SCALE + dy;
                        if x < width && y < height {
                            let idx = y as usize * stride + x as usize * 4;
                            buf[idx..idx + 4].copy_from_slice(&[0xff; 4]);
                        }
                    }
                }
            }
        }
    }
}

/// Draws the timestamp onto staged frames
pub struct TimestampOverlay {
    scratch: Option<std::sync::Arc<Texture>>,
}

impl TimestampOverlay {
    pub fn new() -> Self {
        Self { scratch: None }
    }

    /// Stamp the current time onto `texture`
    pub fn stamp_now(&mut self, device: &dyn GpuDevice, texture: &Texture) -> Result<()> {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        self.stamp(device, texture, micros)
    }

    /// Stamp `micros` onto `texture`.
    ///
    /// The covered region is read back through a small staging texture so
    /// only the glyph pixels change.
    pub fn stamp(&mut self, device: &dyn GpuDevice, texture: &Texture, micros: u64) -> Result<()> {
        if texture.format().bytes_per_pixel() != Some(4) {
            return Err(DisplayError::encoder("Timestamp overlay needs a packed RGB surface"));
        }
        let (x, y) = ORIGIN;
        if x >= texture.width() || y >= texture.height() {
            return Ok(());
        }
        let width = (STAMP_CHARS * ADVANCE).min(texture.width() - x);
        let height = (5 * SCALE).min(texture.height() - y);
        let region = Region::new(x, y, width, height);

        let scratch = match &self.scratch {
            Some(s) if s.width() == width && s.height() == height && s.format() == texture.format() => {
                s.clone()
            }
            _ => {
                let s = device.create_texture(&TextureDesc::new(width, height, texture.format()).staging())?;
                self.scratch = Some(s.clone());
                s
            }
        };

        device.copy_region(&scratch, 0, 0, texture, region)?;
        let mut pixels = device.map_read(&scratch)?;
        draw_digits(&mut pixels, width, height, &format_timestamp(micros));
        device.update_region(texture, region, &pixels)
    }
}

impl Default for TimestampOverlay {
    fn default() -> Self {
        Self::new()
    }
}
