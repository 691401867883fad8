//! Configuration file loading and saving
//!
//! Loads settings from `~/.config/vdisplay/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{DisplayError, Result};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Device identity reported to the host
    #[serde(default)]
    pub device: DeviceSettings,

    /// Window, render target and refresh settings
    #[serde(default)]
    pub display: DisplaySettings,

    /// Encoder settings
    #[serde(default)]
    pub encoder: EncoderSettings,

    /// Listen addresses for the remote display
    #[serde(default)]
    pub network: NetworkSettings,

    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Present path selection
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_serial_number")]
    pub serial_number: String,

    #[serde(default = "default_model_number")]
    pub model_number: String,
}

/// Display geometry and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Window position on the desktop
    #[serde(default)]
    pub window_x: i32,
    #[serde(default)]
    pub window_y: i32,

    /// Window size in pixels
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Recommended per-eye render target size
    #[serde(default = "default_render_width")]
    pub render_width: u32,
    #[serde(default = "default_render_height")]
    pub render_height: u32,

    /// Encoded stream size
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,

    /// Refresh rate as a fraction (numerator / denominator Hz)
    #[serde(default = "default_refresh_numerator")]
    pub refresh_numerator: u32,
    #[serde(default = "default_refresh_denominator")]
    pub refresh_denominator: u32,

    /// Inter-pupillary distance in meters
    #[serde(default = "default_ipd")]
    pub ipd: f32,

    #[serde(default)]
    pub seconds_from_vsync_to_photons: f32,

    /// Display frequency reported to the host
    #[serde(default = "default_display_frequency")]
    pub display_frequency: f32,

    /// Extra latency of the remote device in seconds (negative values are clamped to 0)
    #[serde(default)]
    pub additional_latency: f64,
}

/// Encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Option string in `-key value` form
    #[serde(default = "default_encoder_options")]
    pub options: String,

    /// Encoder input format: bgra, rgba or nv12
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Number of encoder input surfaces
    #[serde(default = "default_input_surfaces")]
    pub input_surfaces: u32,

    /// Raw packet dump path (empty = disabled)
    #[serde(default)]
    pub output_file: String,

    /// Stamp the wall-clock time onto each frame
    #[serde(default)]
    pub debug_timestamp: bool,
}

/// Network listen addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_listen_host")]
    pub control_host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive (trace, debug, info, warn, error or an EnvFilter string)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (empty = stderr)
    #[serde(default)]
    pub file: String,
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Present path: virtual (single layer) or direct (layered)
    #[serde(default = "default_mode")]
    pub mode: String,
}

// Default value functions
fn default_serial_number() -> String {
    "VD-0001".to_string()
}

fn default_model_number() -> String {
    "vdisplay remote".to_string()
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_render_width() -> u32 {
    1024
}

fn default_render_height() -> u32 {
    1024
}

fn default_display_width() -> u32 {
    2048
}

fn default_display_height() -> u32 {
    1024
}

fn default_refresh_numerator() -> u32 {
    60
}

fn default_refresh_denominator() -> u32 {
    1
}

fn default_ipd() -> f32 {
    0.063
}

fn default_display_frequency() -> f32 {
    60.0
}

fn default_encoder_options() -> String {
    "-codec h264 -preset ll -rc cbr -bitrate 8M".to_string()
}

fn default_pixel_format() -> String {
    "bgra".to_string()
}

fn default_input_surfaces() -> u32 {
    4
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    9944
}

fn default_control_port() -> u16 {
    9945
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mode() -> String {
    "direct".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            serial_number: default_serial_number(),
            model_number: default_model_number(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            window_x: 0,
            window_y: 0,
            window_width: default_window_width(),
            window_height: default_window_height(),
            render_width: default_render_width(),
            render_height: default_render_height(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            refresh_numerator: default_refresh_numerator(),
            refresh_denominator: default_refresh_denominator(),
            ipd: default_ipd(),
            seconds_from_vsync_to_photons: 0.0,
            display_frequency: default_display_frequency(),
            additional_latency: 0.0,
        }
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            options: default_encoder_options(),
            pixel_format: default_pixel_format(),
            input_surfaces: default_input_surfaces(),
            output_file: String::new(),
            debug_timestamp: false,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            control_host: default_listen_host(),
            control_port: default_control_port(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("vdisplay").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("vdisplay")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/vdisplay/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| DisplayError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DisplayError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)?;

        std::fs::write(&path, content)
            .map_err(|e| DisplayError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DisplayError::config(format!("Failed to create config directory: {}", e))
            })?;
        }
        std::fs::write(&path, sample_config())
            .map_err(|e| DisplayError::config(format!("Failed to write config file: {}", e)))?;
        info!("Created default configuration at {:?}", path);
        Ok(true)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# vdisplay configuration

[device]
serial_number = "VD-0001"
model_number = "vdisplay remote"

[display]
# Desktop window the compositor presents into
window_x = 0
window_y = 0
window_width = 1920
window_height = 1080

# Recommended per-eye render target
render_width = 1024
render_height = 1024

# Encoded stream size (side-by-side: twice the render width)
display_width = 2048
display_height = 1024

# Refresh rate = numerator / denominator Hz
refresh_numerator = 60
refresh_denominator = 1

ipd = 0.063
seconds_from_vsync_to_photons = 0.0
display_frequency = 60.0

# Extra latency of the remote device in seconds
additional_latency = 0.0

[encoder]
# -codec h264|hevc|raw -preset <name> -rc cbr|vbr|constqp -bitrate <n>[k|M] -gop <n> -fps <n>
options = "-codec h264 -preset ll -rc cbr -bitrate 8M"

# Encoder input format: bgra, rgba, nv12
pixel_format = "bgra"

# Encoder input surface pool size
input_surfaces = 4

# Raw packet dump for offline inspection (empty = disabled)
output_file = ""

# Stamp HH MM SS mmm uuu onto every frame
debug_timestamp = false

[network]
listen_host = "0.0.0.0"
listen_port = 9944
control_host = "0.0.0.0"
control_port = 9945

[logging]
# trace, debug, info, warn, error (or an EnvFilter directive)
level = "info"

# Log file (empty = stderr)
file = ""

[pipeline]
# virtual: single-layer present, direct: layered stereo submission
mode = "direct"
"#
    .to_string()
}
