//! Configuration types for vdisplay
//!
//! [`ConfigFile`] is what lives on disk; [`DriverConfig`] is the typed
//! runtime configuration the driver is constructed from.

mod encoder;
mod file;

pub use encoder::{parse_bitrate, Codec, EncoderOptions, RateControl};
pub use file::{
    sample_config, ConfigFile, DeviceSettings, DisplaySettings, EncoderSettings, LoggingSettings,
    NetworkSettings, PipelineSettings,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::gpu::PixelFormat;
use crate::logging::LogConfig;

/// Which present path the driver exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Single-layer present into a desktop window
    Virtual,
    /// Layered stereo submission
    #[default]
    Direct,
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Virtual => write!(f, "virtual"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

impl std::str::FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "virtual" | "single" => Ok(Self::Virtual),
            "direct" | "layered" => Ok(Self::Direct),
            _ => Err(format!("Unknown pipeline mode: {}", s)),
        }
    }
}

/// Window placement on the desktop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Refresh rate as numerator / denominator Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl RefreshRate {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Refresh rate in Hz
    pub fn hz(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Seconds between vsyncs (denominator / numerator)
    pub fn frame_interval(&self) -> f64 {
        self.denominator as f64 / self.numerator as f64
    }

    pub fn is_valid(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }
}

/// Runtime configuration for the driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub serial_number: String,
    pub model_number: String,
    pub window: WindowBounds,
    /// Per-eye render target size
    pub render_width: u32,
    pub render_height: u32,
    /// Encoded stream size
    pub display_width: u32,
    pub display_height: u32,
    pub refresh: RefreshRate,
    pub ipd: f32,
    pub seconds_from_vsync_to_photons: f32,
    pub display_frequency: f32,
    /// Remote device latency in seconds, never negative
    pub additional_latency: f64,
    pub encoder: EncoderOptions,
    /// Encoder input format
    pub pixel_format: PixelFormat,
    pub input_surfaces: u32,
    /// Raw packet dump path
    pub output_file: Option<PathBuf>,
    pub debug_timestamp: bool,
    pub listen_host: String,
    pub listen_port: u16,
    pub control_host: String,
    pub control_port: u16,
    pub mode: PipelineMode,
    pub log: LogConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

impl From<ConfigFile> for DriverConfig {
    fn from(file: ConfigFile) -> Self {
        let display = file.display;
        let encoder = match file.encoder.options.parse::<EncoderOptions>() {
            Ok(options) => options,
            Err(e) => {
                warn!("Invalid encoder options '{}': {}, using defaults", file.encoder.options, e);
                EncoderOptions::default()
            }
        };
        let pixel_format = match file.encoder.pixel_format.parse::<PixelFormat>() {
            Ok(format) => format,
            Err(e) => {
                warn!("{}, using BGRA", e);
                PixelFormat::Bgra8
            }
        };
        let mode = match file.pipeline.mode.parse::<PipelineMode>() {
            Ok(mode) => mode,
            Err(e) => {
                warn!("{}, using direct mode", e);
                PipelineMode::Direct
            }
        };

        Self {
            serial_number: file.device.serial_number,
            model_number: file.device.model_number,
            window: WindowBounds {
                x: display.window_x,
                y: display.window_y,
                width: display.window_width,
                height: display.window_height,
            },
            render_width: display.render_width,
            render_height: display.render_height,
            display_width: display.display_width,
            display_height: display.display_height,
            refresh: RefreshRate::new(display.refresh_numerator, display.refresh_denominator),
            ipd: display.ipd,
            seconds_from_vsync_to_photons: display.seconds_from_vsync_to_photons,
            display_frequency: display.display_frequency,
            additional_latency: display.additional_latency.max(0.0),
            encoder,
            pixel_format,
            input_surfaces: file.encoder.input_surfaces,
            output_file: non_empty_path(&file.encoder.output_file),
            debug_timestamp: file.encoder.debug_timestamp,
            listen_host: file.network.listen_host,
            listen_port: file.network.listen_port,
            control_host: file.network.control_host,
            control_port: file.network.control_port,
            mode,
            log: LogConfig {
                level: file.logging.level,
                file: non_empty_path(&file.logging.file),
            },
        }
    }
}

fn non_empty_path(path: &str) -> Option<PathBuf> {
    let path = path.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

impl DriverConfig {
    pub fn with_render_size(mut self, width: u32, height: u32) -> Self {
        self.render_width = width;
        self.render_height = height;
        self
    }

    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_width = width;
        self.display_height = height;
        self
    }

    pub fn with_refresh(mut self, numerator: u32, denominator: u32) -> Self {
        self.refresh = RefreshRate::new(numerator, denominator);
        self
    }

    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }

    /// Additional latency in seconds; negative values are clamped to 0
    pub fn with_additional_latency(mut self, seconds: f64) -> Self {
        self.additional_latency = seconds.max(0.0);
        self
    }

    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn with_debug_timestamp(mut self, enabled: bool) -> Self {
        self.debug_timestamp = enabled;
        self
    }

    /// Seconds between vsyncs
    pub fn frame_interval(&self) -> f64 {
        self.refresh.frame_interval()
    }

    /// Frame rate handed to the encoder
    pub fn encoder_fps(&self) -> u32 {
        self.encoder
            .fps
            .unwrap_or_else(|| self.refresh.hz().round().max(1.0) as u32)
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.mode == PipelineMode::Direct
            && (self.display_width != self.render_width * 2
                || self.display_height != self.render_height)
        {
            warnings.push(format!(
                "Direct mode encodes at the side-by-side render size {}x{}; display size {}x{} is not used.",
                self.render_width * 2,
                self.render_height,
                self.display_width,
                self.display_height
            ));
        }

        if self.pixel_format == PixelFormat::Nv12
            && (self.display_width % 2 != 0 || self.display_height % 2 != 0)
        {
            warnings.push("NV12 encoding with odd dimensions duplicates the last row/column.".to_string());
        }

        if self.refresh.is_valid() && self.refresh.hz() > 144.0 {
            warnings.push(format!(
                "Refresh rate {:.1}Hz is higher than most remote displays support.",
                self.refresh.hz()
            ));
        }

        if self.additional_latency > 0.1 {
            warnings.push(format!(
                "Additional latency {:.0}ms exceeds 100ms; pacing will lag noticeably.",
                self.additional_latency * 1000.0
            ));
        }

        if self.encoder.codec != Codec::Raw && self.encoder.bitrate < 1_000_000 {
            warnings.push(format!(
                "Bitrate {} kbps is very low for a {}x{} stream.",
                self.encoder.bitrate_kbps(),
                self.display_width,
                self.display_height
            ));
        }

        if self.input_surfaces < 2 {
            warnings.push("Fewer than 2 encoder input surfaces serializes encode and copy.".to_string());
        }

        warnings
    }

    /// Validate and return an error if the configuration cannot work
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.display_width == 0 || self.display_height == 0 {
            return Err(format!(
                "Invalid parameters. w={} h={}",
                self.display_width, self.display_height
            ));
        }

        if self.render_width == 0 || self.render_height == 0 {
            return Err(format!(
                "Invalid render size {}x{}",
                self.render_width, self.render_height
            ));
        }

        if !self.refresh.is_valid() {
            return Err(format!(
                "Invalid parameters. refresh={}/{}",
                self.refresh.numerator, self.refresh.denominator
            ));
        }

        if self.display_width > 8192 || self.display_height > 8192 {
            return Err(format!(
                "Resolution {}x{} exceeds maximum supported (8192x8192)",
                self.display_width, self.display_height
            ));
        }

        if self.input_surfaces == 0 {
            return Err("Encoder needs at least one input surface".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval_is_denominator_over_numerator() {
        let config = DriverConfig::default().with_refresh(90, 1);
        assert!((config.frame_interval() - 1.0 / 90.0).abs() < 1e-12);

        let ntsc = RefreshRate::new(60000, 1001);
        assert!((ntsc.frame_interval() - 0.01668333).abs() < 1e-6);
    }

    #[test]
    fn test_negative_latency_clamped() {
        let mut file = ConfigFile::default();
        file.display.additional_latency = -0.5;
        let config = DriverConfig::from(file);
        assert_eq!(config.additional_latency, 0.0);
        assert_eq!(DriverConfig::default().with_additional_latency(-1.0).additional_latency, 0.0);
    }

    #[test]
    fn test_empty_paths_are_none() {
        let config = DriverConfig::default();
        assert!(config.output_file.is_none());
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_strict_rejects_zero_refresh() {
        let config = DriverConfig::default().with_refresh(0, 1);
        assert!(config.validate_strict().is_err());
        let config = DriverConfig::default().with_refresh(60, 0);
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn test_encoder_fps_follows_refresh() {
        let config = DriverConfig::default().with_refresh(90, 1);
        assert_eq!(config.encoder_fps(), 90);
    }
}
