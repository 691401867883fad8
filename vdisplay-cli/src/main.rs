//! vdisplay CLI
//!
//! Runs the virtual display pipeline against a synthetic compositor and
//! manages its configuration.
//!
//! # Usage
//!
//! ```bash
//! # Stream a test pattern to the first client that says hello
//! vdisplay run
//!
//! # Encode 300 frames in single-layer mode and dump them to a file
//! vdisplay run --mode virtual --frames 300 --output /tmp/stream.raw
//!
//! # Show encoder support
//! vdisplay info
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vdisplay_core::config::ConfigFile;
use vdisplay_core::logging::{self, LogConfig};

/// vdisplay - remote HMD display driver
#[derive(Parser)]
#[command(name = "vdisplay")]
#[command(version)]
#[command(about = "Capture, encode and stream compositor frames to a remote display", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to the per-user location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline with a synthetic compositor
    Run(commands::RunArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),

    /// Show encoder support and effective defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => ConfigFile::load_from(path.clone())
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::load_or_default(),
    };

    // Verbosity flags override the configured level
    let level = match cli.verbose {
        0 => file.logging.level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let log_file = file.logging.file.trim();
    logging::init(&LogConfig {
        level,
        file: (!log_file.is_empty()).then(|| PathBuf::from(log_file)),
    })
    .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Run(args) => commands::run(file, args).await?,
        Commands::Config(args) => commands::config(cli.config, args).await?,
        Commands::Info => commands::info(file).await?,
    }

    Ok(())
}
