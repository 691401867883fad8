//! CLI command implementations

mod config;
mod info;
mod run;

pub use config::{config, ConfigArgs};
pub use info::info;
pub use run::{run, RunArgs};
