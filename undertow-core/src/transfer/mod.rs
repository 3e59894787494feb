//! Bridge between the auxiliary transfer engine and the daemon reactor.
//!
//! Tracker announces, webseeds and feed polling run inside an external
//! multi-socket transfer engine. The engine decides which sockets it wants
//! watched; this module keeps the reactor's registrations in lock-step with
//! those wishes and drives the engine whenever the reactor reports readiness.
//!
//! # Data Flow
//! ```text
//! reactor readiness ──▶ TransferStack::dispatch ──▶ engine.drive()
//!        ▲                                              │
//!        │                                              ▼
//!  insert/remove_* ◀── handle_interest_change ◀── InterestChanges queue
//! ```

pub mod engine;
pub mod socket;
pub mod stack;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::os::fd::RawFd;

pub use engine::{
    DriveTarget, IdleEngine, InterestAction, InterestChange, InterestChanges, TransferEngine,
};
pub use socket::{SocketHandle, SocketKey};
pub use stack::TransferStack;
#[cfg(any(test, feature = "test-utils"))]
pub use test_mocks::{ScriptedChange, ScriptedEngine};

/// Errors surfaced by the transfer bridge.
///
/// Protocol desync between engine and bridge is not represented here: it is
/// an invariant violation and panics instead.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid socket descriptor {fd}")]
    InvalidDescriptor { fd: RawFd },

    #[error("Failed to open socket {fd} in reactor")]
    SocketOpen {
        fd: RawFd,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to update reactor interest for socket {fd}")]
    Registration {
        fd: RawFd,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket limit of {limit} reached, refusing socket {fd}")]
    SocketLimit { fd: RawFd, limit: usize },

    #[error("Transfer engine error: {reason}")]
    Engine { reason: String },

    #[error("Transfer stack is shutting down")]
    ShuttingDown,
}

impl TransferError {
    /// Returns true if the error stems from running out of descriptors or
    /// socket slots.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            TransferError::SocketLimit { .. } => true,
            TransferError::SocketOpen { source, .. } => {
                matches!(source.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
            }
            _ => false,
        }
    }
}
