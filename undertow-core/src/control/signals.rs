//! SIGINT/SIGTERM handling for the event loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::SigId;
use signal_hook::consts::{SIGINT, SIGTERM};

use super::{ControlError, ShutdownMode};

/// Latches termination signals until the event loop picks them up.
///
/// The handler only sets a flag; translating it into a shutdown request
/// happens on the reactor thread.
#[derive(Debug)]
pub struct ShutdownSignals {
    pending: Arc<AtomicBool>,
    registrations: Vec<SigId>,
}

impl ShutdownSignals {
    /// Registers handlers for SIGINT and SIGTERM.
    ///
    /// # Errors
    ///
    /// - `ControlError::Signals` - A handler could not be registered
    pub fn install() -> Result<Self, ControlError> {
        let mut signals = Self::detached();

        for signal in [SIGINT, SIGTERM] {
            let id = signal_hook::flag::register(signal, Arc::clone(&signals.pending))
                .map_err(ControlError::Signals)?;
            signals.registrations.push(id);
        }

        tracing::debug!("Shutdown signal handlers installed");
        Ok(signals)
    }

    /// Signal latch with no OS handlers behind it.
    pub fn detached() -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            registrations: Vec::new(),
        }
    }

    /// Latches a signal as if one had been delivered.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending signal.
    ///
    /// The first signal asks for a normal shutdown; one arriving after
    /// shutdown has started asks for a quick one.
    pub fn take_request(&self, shutdown_started: bool) -> Option<ShutdownMode> {
        if !self.pending.swap(false, Ordering::SeqCst) {
            return None;
        }

        let mode = if shutdown_started {
            ShutdownMode::Quick
        } else {
            ShutdownMode::Normal
        };
        tracing::info!(%mode, "Termination signal received");
        Some(mode)
    }
}

impl Drop for ShutdownSignals {
    fn drop(&mut self) {
        for id in self.registrations.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
