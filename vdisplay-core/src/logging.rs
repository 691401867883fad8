//! Diagnostics setup
//!
//! The library only emits `tracing` events. Hosts that have no subscriber of
//! their own call [`init`] once with the configured level and optional log
//! file; later calls are no-ops.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::EnvFilter;

use crate::error::{DisplayError, Result};

static INIT: Once = Once::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level or EnvFilter directive; `RUST_LOG` takes precedence when set
    pub level: String,
    /// Append to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LogConfig {
    fn filter(&self) -> Result<EnvFilter> {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return Ok(EnvFilter::from_default_env());
        }
        let directive = match self.level.to_lowercase().as_str() {
            level @ ("trace" | "debug" | "info" | "warn" | "error") => {
                format!("vdisplay_core={level},vdisplay={level}")
            }
            other => other.to_string(),
        };
        EnvFilter::try_new(&directive)
            .map_err(|e| DisplayError::config(format!("Invalid log filter '{}': {}", directive, e)))
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` if logging was already initialized by an earlier call.
pub fn init(config: &LogConfig) -> Result<bool> {
    let mut result = Ok(false);
    INIT.call_once(|| result = install(config).map(|_| true));
    result
}

fn install(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| DisplayError::config(format!("Failed to open log file {:?}: {}", path, e)))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    // Another subscriber already being installed is not an error for a library
    if let Err(e) = installed {
        tracing::debug!("Global subscriber already set: {}", e);
    }
    Ok(())
}
