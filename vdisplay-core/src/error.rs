//! Error types for vdisplay

use thiserror::Error;

/// Result type alias using DisplayError
pub type Result<T> = std::result::Result<T, DisplayError>;

/// Main error type for vdisplay operations
#[derive(Debug, Error)]
pub enum DisplayError {
    /// GPU object creation or command failure
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Shader compilation failure
    #[error("Shader error: {0}")]
    Shader(String),

    /// Encoder error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// NVENC-specific error
    #[error("NVENC error: {0}")]
    Nvenc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected initialization parameters (zero dimensions, zero refresh rate)
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A process-lifetime resource was requested a second time
    #[error("Resource already created: {0}")]
    AlreadyCreated(&'static str),

    /// Keyed mutex acquire timed out
    #[error("Sync acquire timed out after {timeout_ms}ms (key {key})")]
    SyncTimeout { key: u64, timeout_ms: u64 },

    /// Shared texture handle is not known to the device or registry
    #[error("Unknown shared handle: {0:#x}")]
    UnknownHandle(u64),

    /// Network transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Pipeline was used after it stopped
    #[error("Pipeline stopped")]
    Stopped,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DisplayError>,
    },
}

impl DisplayError {
    /// Create a GPU error
    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    /// Create a shader error
    pub fn shader(msg: impl Into<String>) -> Self {
        Self::Shader(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create an NVENC error
    pub fn nvenc(msg: impl Into<String>) -> Self {
        Self::Nvenc(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid parameters error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error only costs the current frame.
    ///
    /// Sync timeouts, encode failures and transport hiccups drop a frame and
    /// the pipeline keeps running. Everything else is fatal at init.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SyncTimeout { .. }
            | Self::Encoder(_)
            | Self::Nvenc(_)
            | Self::Transport(_)
            | Self::UnknownHandle(_) => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// Conversions from external error types

impl From<toml::de::Error> for DisplayError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config file: {}", err))
    }
}

impl From<toml::ser::Error> for DisplayError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(format!("Failed to serialize config: {}", err))
    }
}

#[cfg(feature = "nvenc")]
impl From<ffmpeg_next::Error> for DisplayError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Encoder(err.to_string())
    }
}
