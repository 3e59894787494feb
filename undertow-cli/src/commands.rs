//! CLI command implementations

use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use undertow_core::config::{UndertowConfig, parse_umask};
use undertow_core::{Result, UndertowError, daemon};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon until SIGINT or SIGTERM
    Run {
        /// Directory to change into before subsystems start
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// File mode creation mask, in octal
        #[arg(long, value_parser = parse_umask)]
        umask: Option<u32>,
        /// Seconds a normal shutdown may take before it turns quick
        #[arg(long)]
        quick_shutdown_delay: Option<u64>,
    },
    /// Print the effective configuration
    Config,
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            working_dir,
            umask,
            quick_shutdown_delay,
        } => run(working_dir, umask, quick_shutdown_delay),
        Commands::Config => show_config(),
    }
}

/// Run the daemon with command-line overrides applied on top of the
/// environment configuration
///
/// # Errors
/// - `UndertowError::Control` - Startup, event loop or cleanup failed
/// - `UndertowError::Io` - The reactor could not be created
pub fn run(
    working_dir: Option<PathBuf>,
    umask: Option<u32>,
    quick_shutdown_delay: Option<u64>,
) -> Result<()> {
    let mut config = UndertowConfig::from_env();
    if working_dir.is_some() {
        config.process.working_directory = working_dir;
    }
    if umask.is_some() {
        config.process.umask = umask;
    }
    if let Some(seconds) = quick_shutdown_delay {
        config.shutdown.quick_shutdown_delay = Duration::from_secs(seconds);
    }

    daemon::run_daemon(config, Vec::new())
}

/// Print the configuration `run` would use
///
/// # Errors
/// - `UndertowError::Configuration` - Configuration could not be rendered
pub fn show_config() -> Result<()> {
    let config = UndertowConfig::from_env();
    let rendered =
        serde_json::to_string_pretty(&config).map_err(|e| UndertowError::Configuration {
            reason: e.to_string(),
        })?;

    println!("{rendered}");
    Ok(())
}
