//! Tracing setup for the undertow daemon
//!
//! Console output follows the operator's chosen level while the daemon's own
//! events, down to per-socket interest changes, are written to disk.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE_NAME: &str = "undertow-last-run.log";

/// Targets written to the run log at full detail. Everything else, such as
/// the poller internals, is kept at `info`.
const FILE_DIRECTIVES: &str = "info,undertow_core=trace,undertowd=trace";

/// Resolves where this run's trace log lives and creates its directory.
///
/// The returned path is absolute, so it stays valid after the controller
/// applies a configured working directory.
///
/// # Errors
///
/// - `io::Error` - If the directory cannot be created or resolved
pub fn log_file_path(logs_dir: Option<&Path>) -> io::Result<PathBuf> {
    let dir = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(dir)?;
    Ok(dir.canonicalize()?.join(LOG_FILE_NAME))
}

/// Starts console output at `console_level` and a full trace log on disk.
///
/// `RUST_LOG`, when set, overrides the console level only. The run log at
/// `<logs_dir>/undertow-last-run.log` (default `./logs`) is truncated on each
/// start and records the daemon's own targets down to per-socket interest
/// changes. The first event names the launch directory and process id.
/// Returns the absolute path of the run log.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - If the log directory or file cannot be created
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_file = log_file_path(logs_dir)?;
    let launch_dir = std::env::current_dir()?;

    let console = fmt::layer()
        .with_target(true)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(console_level.to_string())),
        );

    // The daemon runs on a single loop thread, so thread ids add nothing.
    let run_log = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(File::create(&log_file)?)
        .with_filter(EnvFilter::new(FILE_DIRECTIVES));

    tracing_subscriber::registry()
        .with(console)
        .with(run_log)
        .try_init()?;

    tracing::info!(
        console = %console_level,
        log_file = %log_file.display(),
        launch_dir = %launch_dir.display(),
        pid = std::process::id(),
        "Tracing initialized"
    );

    Ok(log_file)
}

/// Console log levels selectable from the command line
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    Info,
    /// Debug, informational, warning, and error messages
    Debug,
    /// All messages including detailed tracing
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use undertow_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert!(matches!("WARN".parse::<CliLogLevel>(), Ok(CliLogLevel::Warn)));
        assert!("verbose".parse::<CliLogLevel>().is_err());
        assert_eq!(CliLogLevel::Trace.to_string(), "trace");
        assert_eq!(CliLogLevel::Debug.as_tracing_level(), Level::DEBUG);
    }

    #[test]
    fn test_log_file_path_is_absolute_and_created() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");

        let path = log_file_path(Some(&logs)).unwrap();

        assert!(path.is_absolute());
        assert!(logs.is_dir());
        assert_eq!(path.file_name().unwrap(), LOG_FILE_NAME);
        assert_eq!(path.parent().unwrap(), logs.canonicalize().unwrap());
    }

    #[test]
    fn test_log_file_path_rejects_file_as_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"not a directory").unwrap();

        assert!(log_file_path(Some(&blocker)).is_err());
    }
}
