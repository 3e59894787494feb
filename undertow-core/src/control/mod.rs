//! Daemon lifecycle: initialization, two-phase shutdown and teardown.
//!
//! The controller owns the reactor, the transfer stack and every other
//! subsystem. Shutdown runs in two phases: a normal shutdown lets in-flight
//! work drain and escalates to a quick shutdown once the grace period
//! expires; a quick shutdown aborts outstanding work. Teardown always runs
//! in reverse initialization order, with the transfer stack released before
//! the reactor it registered sockets with.

pub mod controller;
pub mod signals;
pub mod state;
pub mod subsystem;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::path::PathBuf;

pub use controller::Control;
pub use signals::ShutdownSignals;
pub use state::{LifecycleState, ShutdownMode};
pub use subsystem::{Subsystem, SubsystemError};
#[cfg(any(test, feature = "test-utils"))]
pub use test_mocks::MockSubsystem;

use crate::transfer::TransferError;

/// Errors raised by the lifecycle controller.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Subsystem '{name}' failed")]
    SubsystemFailed {
        name: String,
        #[source]
        source: SubsystemError,
    },

    #[error("Transfer stack error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Reactor failure: {0}")]
    Reactor(#[source] std::io::Error),

    #[error("Failed to change working directory to {}", path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}
