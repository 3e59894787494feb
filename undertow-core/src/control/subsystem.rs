//! Contract every subsystem owned by the controller satisfies.

use super::ShutdownMode;

/// Errors a subsystem reports from initialization or cleanup.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    #[error("{reason}")]
    Failed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SubsystemError {
    pub fn failed(reason: impl Into<String>) -> Self {
        SubsystemError::Failed {
            reason: reason.into(),
        }
    }
}

/// A daemon component whose lifetime the controller manages.
///
/// Subsystems are initialized in registration order and cleaned up in
/// reverse. Peer wire, storage, RPC and UI components all plug in here.
pub trait Subsystem {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Acquires resources.
    ///
    /// # Errors
    ///
    /// - `SubsystemError` - The subsystem could not start
    fn initialize(&mut self) -> Result<(), SubsystemError>;

    /// Releases everything acquired by [`Subsystem::initialize`].
    ///
    /// # Errors
    ///
    /// - `SubsystemError` - Release failed; the controller moves on regardless
    fn cleanup(&mut self) -> Result<(), SubsystemError>;

    /// True once the subsystem has no outstanding work.
    fn is_shutdown_completed(&self) -> bool {
        true
    }

    /// Stop taking on new work. Called once per mode.
    fn begin_shutdown(&mut self, _mode: ShutdownMode) {}

    /// Periodic housekeeping, once per event loop iteration.
    fn on_tick(&mut self, _tick: u64) {}
}
