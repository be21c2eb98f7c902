//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Keeps the non-blocking file writer alive for the life of the process.
pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "locker", version, about = "Laser arrival-time locker")]
pub struct Cli {
    /// Path to the installation config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/locker.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Also write logs to this directory, rotated daily
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the supervisor loop for the configured installation
    Run {
        /// Back the channel layer with the built-in simulator instead of a
        /// live control system
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,

        /// Simulator: true trigger-to-laser cable delay, ns
        #[arg(long, value_name = "NS", default_value_t = 5.0)]
        sim_delay_ns: f64,

        /// Simulator: true photodiode-to-counter offset, ns
        #[arg(long, value_name = "NS", default_value_t = 2.0)]
        sim_offset_ns: f64,
    },
    /// Parse and validate a config file, printing the resolved summary
    CheckConfig,
}
