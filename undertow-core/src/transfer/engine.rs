//! Contract between the bridge and the external transfer engine.

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::time::Duration;

use super::{SocketKey, TransferError};
use crate::control::ShutdownMode;
use crate::reactor::SocketEvent;

/// What an interest notification asks the bridge to do with a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterestAction {
    /// First notification for a descriptor the engine started using
    Establish,
    /// Changed read/write interest for a descriptor already in use
    Modify,
    /// Engine is done with the descriptor
    Remove,
}

/// Desired socket interest emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestChange {
    pub fd: RawFd,
    pub action: InterestAction,
    pub read: bool,
    pub write: bool,
    /// Key previously assigned by the bridge, if the engine has one
    pub associated: Option<SocketKey>,
}

impl InterestChange {
    pub fn establish(fd: RawFd, read: bool, write: bool) -> Self {
        Self {
            fd,
            action: InterestAction::Establish,
            read,
            write,
            associated: None,
        }
    }

    pub fn modify(fd: RawFd, associated: Option<SocketKey>, read: bool, write: bool) -> Self {
        Self {
            fd,
            action: InterestAction::Modify,
            read,
            write,
            associated,
        }
    }

    pub fn remove(fd: RawFd, associated: Option<SocketKey>) -> Self {
        Self {
            fd,
            action: InterestAction::Remove,
            read: false,
            write: false,
            associated,
        }
    }
}

/// Queue the engine appends interest changes to while it is being driven.
///
/// The bridge drains it after every call into the engine, which keeps
/// engine-triggered registration changes off the engine's call stack.
#[derive(Debug, Default)]
pub struct InterestChanges {
    queue: VecDeque<InterestChange>,
}

impl InterestChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: InterestChange) {
        self.queue.push_back(change);
    }

    pub fn pop(&mut self) -> Option<InterestChange> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Unit of work the engine is asked to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveTarget {
    /// Readiness on one of the engine's sockets
    Socket { fd: RawFd, event: SocketEvent },
    /// The engine's own timer expired
    Timeout,
}

/// External multi-socket transfer engine driven by the bridge.
///
/// All methods are called from the reactor thread. The engine must emit
/// exactly one `Remove` for every descriptor it caused to be established.
pub trait TransferEngine {
    /// Processes pending work for `target`, queueing any interest changes.
    ///
    /// # Errors
    ///
    /// - `TransferError::Engine` - Engine failed to process the work item
    fn drive(
        &mut self,
        target: DriveTarget,
        changes: &mut InterestChanges,
    ) -> Result<(), TransferError>;

    /// Associates `key` with descriptor `fd`, or clears it with `None`.
    fn assign(&mut self, fd: RawFd, key: Option<SocketKey>);

    /// Time until the engine wants [`DriveTarget::Timeout`], if any.
    fn next_timeout(&self) -> Option<Duration>;

    /// Number of transfers still in flight.
    fn active_transfers(&self) -> usize;

    /// Stops accepting work. A quick shutdown aborts running transfers.
    fn begin_shutdown(&mut self, _mode: ShutdownMode, _changes: &mut InterestChanges) {}

    /// Final teardown; must queue a `Remove` for every socket still in use.
    fn cleanup(&mut self, _changes: &mut InterestChanges) {}
}

/// Engine without a transfer backend.
///
/// Never opens sockets and never has work in flight.
#[derive(Debug, Default)]
pub struct IdleEngine;

impl TransferEngine for IdleEngine {
    fn drive(
        &mut self,
        target: DriveTarget,
        _changes: &mut InterestChanges,
    ) -> Result<(), TransferError> {
        tracing::trace!(?target, "Idle engine driven");
        Ok(())
    }

    fn assign(&mut self, _fd: RawFd, _key: Option<SocketKey>) {}

    fn next_timeout(&self) -> Option<Duration> {
        None
    }

    fn active_transfers(&self) -> usize {
        0
    }
}
