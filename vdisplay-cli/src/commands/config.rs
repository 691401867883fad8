//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use vdisplay_core::config::{sample_config, ConfigFile, DriverConfig};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the current configuration
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,

    /// Check the configuration and report problems
    Check,
}

/// Run config subcommand
pub async fn config(path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    let path = path.unwrap_or_else(ConfigFile::default_path);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings. Create a config file with:");
                println!("  vdisplay config init");
                return Ok(());
            }

            let content = std::fs::read_to_string(&path).context("Failed to read config file")?;

            println!("Configuration file: {}\n", path.display());
            println!("{}", content);
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).context("Failed to create config directory")?;
                }
            }

            std::fs::write(&path, sample_config()).context("Failed to write config file")?;

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to match the remote display.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
        ConfigCommand::Check => {
            let file = ConfigFile::load_from(path.clone())?;
            let config = DriverConfig::from(file);

            if let Err(e) = config.validate_strict() {
                anyhow::bail!("{}: {}", path.display(), e);
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}: OK", path.display());
            } else {
                println!("{}: {} warning(s)", path.display(), warnings.len());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }

    Ok(())
}
