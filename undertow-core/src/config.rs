//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UndertowConfig {
    pub reactor: ReactorConfig,
    pub transfer: TransferConfig,
    pub shutdown: ShutdownConfig,
    pub process: ProcessConfig,
}

/// Event loop configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ReactorConfig {
    /// Capacity of the readiness buffer filled by one poll
    pub max_events: usize,
    /// Upper bound on a single reactor wait
    pub max_poll_interval: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_events: 1024,
            max_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Transfer socket bridge configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TransferConfig {
    /// Maximum number of engine sockets registered with the reactor at once
    pub max_live_sockets: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_live_sockets: 512,
        }
    }
}

/// Shutdown sequencing configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownConfig {
    /// Grace period after a normal shutdown before it escalates to quick
    pub quick_shutdown_delay: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            quick_shutdown_delay: Duration::from_secs(5),
        }
    }
}

/// Process-wide settings applied by the lifecycle controller at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessConfig {
    /// Directory to change into before subsystems initialize
    pub working_directory: Option<PathBuf>,
    /// File mode creation mask to apply (None keeps the inherited mask)
    pub umask: Option<u32>,
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(interval) = std::env::var("UNDERTOW_MAX_POLL_INTERVAL_MS") {
            if let Ok(millis) = interval.parse::<u64>() {
                config.reactor.max_poll_interval = Duration::from_millis(millis);
            }
        }

        if let Ok(delay) = std::env::var("UNDERTOW_QUICK_SHUTDOWN_DELAY") {
            if let Ok(seconds) = delay.parse::<u64>() {
                config.shutdown.quick_shutdown_delay = Duration::from_secs(seconds);
            }
        }

        if let Ok(limit) = std::env::var("UNDERTOW_MAX_LIVE_SOCKETS") {
            if let Ok(count) = limit.parse::<usize>() {
                config.transfer.max_live_sockets = count;
            }
        }

        if let Ok(dir) = std::env::var("UNDERTOW_WORKING_DIRECTORY") {
            if !dir.is_empty() {
                config.process.working_directory = Some(PathBuf::from(dir));
            }
        }

        if let Ok(mask) = std::env::var("UNDERTOW_UMASK") {
            config.process.umask = parse_umask(&mask).ok();
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Short poll interval and no grace period so shutdown tests finish fast.
    pub fn for_testing() -> Self {
        Self {
            reactor: ReactorConfig {
                max_events: 64,
                max_poll_interval: Duration::from_millis(10),
            },
            shutdown: ShutdownConfig {
                quick_shutdown_delay: Duration::ZERO,
            },
            ..Default::default()
        }
    }
}

/// Parses an octal file mode creation mask such as `022` or `0o077`.
///
/// # Errors
///
/// - `String` - If the value is not octal or exceeds `0o777`
pub fn parse_umask(value: &str) -> Result<u32, String> {
    let digits = value.trim().trim_start_matches("0o");
    let mask =
        u32::from_str_radix(digits, 8).map_err(|_| format!("Invalid umask: '{value}'"))?;

    if mask > 0o777 {
        return Err(format!("Umask out of range: '{value}'"));
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.reactor.max_events, 1024);
        assert_eq!(config.reactor.max_poll_interval, Duration::from_secs(1));
        assert_eq!(config.transfer.max_live_sockets, 512);
        assert_eq!(config.shutdown.quick_shutdown_delay, Duration::from_secs(5));
        assert!(config.process.working_directory.is_none());
        assert!(config.process.umask.is_none());
    }

    #[test]
    fn test_testing_preset() {
        let config = UndertowConfig::for_testing();
        assert_eq!(config.shutdown.quick_shutdown_delay, Duration::ZERO);
        assert!(config.reactor.max_poll_interval < Duration::from_secs(1));
    }

    #[test]
    fn test_parse_umask() {
        assert_eq!(parse_umask("022"), Ok(0o022));
        assert_eq!(parse_umask("0o077"), Ok(0o077));
        assert_eq!(parse_umask(" 7 "), Ok(0o7));
        assert!(parse_umask("089").is_err());
        assert!(parse_umask("1777").is_err());
        assert!(parse_umask("").is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("UNDERTOW_MAX_POLL_INTERVAL_MS", "250");
            std::env::set_var("UNDERTOW_QUICK_SHUTDOWN_DELAY", "12");
            std::env::set_var("UNDERTOW_MAX_LIVE_SOCKETS", "64");
            std::env::set_var("UNDERTOW_WORKING_DIRECTORY", "/var/lib/undertow");
            std::env::set_var("UNDERTOW_UMASK", "027");
        }

        let config = UndertowConfig::from_env();

        assert_eq!(config.reactor.max_poll_interval, Duration::from_millis(250));
        assert_eq!(config.shutdown.quick_shutdown_delay, Duration::from_secs(12));
        assert_eq!(config.transfer.max_live_sockets, 64);
        assert_eq!(
            config.process.working_directory,
            Some(PathBuf::from("/var/lib/undertow"))
        );
        assert_eq!(config.process.umask, Some(0o027));

        // Cleanup
        unsafe {
            std::env::remove_var("UNDERTOW_MAX_POLL_INTERVAL_MS");
            std::env::remove_var("UNDERTOW_QUICK_SHUTDOWN_DELAY");
            std::env::remove_var("UNDERTOW_MAX_LIVE_SOCKETS");
            std::env::remove_var("UNDERTOW_WORKING_DIRECTORY");
            std::env::remove_var("UNDERTOW_UMASK");
        }
    }
}
