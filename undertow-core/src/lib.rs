//! Undertow Core - reactor-driven BitTorrent daemon core
//!
//! This crate provides the process skeleton of the undertow daemon: a
//! single-threaded readiness reactor, the bridge that keeps an external
//! multi-socket transfer engine registered with it, and the lifecycle
//! controller that owns every subsystem and sequences its shutdown.

pub mod config;
pub mod control;
pub mod daemon;
pub mod reactor;
pub mod scheduler;
pub mod tracing_setup;
pub mod transfer;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use control::{Control, ControlError, LifecycleState, ShutdownMode, Subsystem};
pub use reactor::{MioReactor, Reactor};
pub use transfer::{TransferEngine, TransferError, TransferStack};

/// Errors that can bubble up from any undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Lifecycle error: {0}")]
    Control(#[from] ControlError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Transfer(e) if e.is_resource_exhaustion() => {
                "Out of sockets or file descriptors".to_string()
            }
            UndertowError::Transfer(_) => "Transfer error occurred".to_string(),
            UndertowError::Control(e) => match e {
                ControlError::WorkingDirectory { path, .. } => {
                    format!("Cannot use working directory {}", path.display())
                }
                ControlError::SubsystemFailed { name, .. } => {
                    format!("Subsystem '{name}' failed")
                }
                ControlError::Signals(_) => "Could not install signal handlers".to_string(),
                ControlError::Reactor(_) => "Event loop failure".to_string(),
                _ => "Daemon lifecycle error occurred".to_string(),
            },
            UndertowError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Control(ControlError::WorkingDirectory { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
