//! Undertow daemon - command-line entry point
//!
//! Runs the undertow daemon core in the foreground.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use undertow_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "undertowd")]
#[command(about = "Reactor-driven BitTorrent daemon")]
#[command(version)]
struct Cli {
    /// Console log level
    #[arg(long, global = true, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to initialize logging")?;

    if let Err(e) = commands::handle_command(cli.command) {
        tracing::error!(error = %e, "undertowd exited with an error");
        let message = e.user_message();
        return Err(anyhow::Error::new(e).context(message));
    }

    Ok(())
}
