//! Mock transfer engine for testing the socket bridge.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::time::Duration;

use super::{
    DriveTarget, InterestAction, InterestChange, InterestChanges, SocketKey, TransferEngine,
    TransferError,
};
use crate::control::ShutdownMode;

/// Interest change the scripted engine emits, before the bridge key is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedChange {
    pub fd: RawFd,
    pub action: InterestAction,
    pub read: bool,
    pub write: bool,
}

impl ScriptedChange {
    pub fn establish(fd: RawFd, read: bool, write: bool) -> Self {
        Self {
            fd,
            action: InterestAction::Establish,
            read,
            write,
        }
    }

    pub fn modify(fd: RawFd, read: bool, write: bool) -> Self {
        Self {
            fd,
            action: InterestAction::Modify,
            read,
            write,
        }
    }

    pub fn remove(fd: RawFd) -> Self {
        Self {
            fd,
            action: InterestAction::Remove,
            read: false,
            write: false,
        }
    }
}

/// Transfer engine driven by a script instead of real transfers.
///
/// Reactions queued with [`ScriptedEngine::on_drive`] are emitted the next
/// time the matching target is driven. Emitted changes carry whatever key the
/// bridge last assigned to their descriptor, the way a real engine hands back
/// its socket context.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    reactions: HashMap<DriveTarget, VecDeque<Vec<ScriptedChange>>>,
    assigned: HashMap<RawFd, SocketKey>,
    drives: Vec<DriveTarget>,
    shutdowns: Vec<ShutdownMode>,
    active: usize,
    timeout: Option<Duration>,
    pending_failure: Option<String>,
    skip_cleanup_removals: bool,
}

impl ScriptedEngine {
    /// Creates an engine with no transfers and no timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `reaction` for the next drive of `target`.
    pub fn on_drive(&mut self, target: DriveTarget, reaction: Vec<ScriptedChange>) {
        self.reactions.entry(target).or_default().push_back(reaction);
    }

    /// Emits `change` with the currently assigned key attached.
    pub fn emit(&self, change: ScriptedChange, changes: &mut InterestChanges) {
        changes.push(InterestChange {
            fd: change.fd,
            action: change.action,
            read: change.read,
            write: change.write,
            associated: self.assigned.get(&change.fd).copied(),
        });
    }

    /// Starts a transfer that uses `sockets`.
    pub fn start_transfer(&mut self, sockets: &[ScriptedChange], changes: &mut InterestChanges) {
        self.active += 1;
        for change in sockets {
            self.emit(*change, changes);
        }
    }

    /// Finishes one transfer, removing `fds`.
    pub fn finish_transfer(&mut self, fds: &[RawFd], changes: &mut InterestChanges) {
        self.active = self.active.saturating_sub(1);
        for fd in fds {
            self.emit(ScriptedChange::remove(*fd), changes);
        }
    }

    pub fn set_active_transfers(&mut self, count: usize) {
        self.active = count;
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Makes the next drive report an engine failure.
    pub fn fail_next_drive(&mut self, reason: &str) {
        self.pending_failure = Some(reason.to_string());
    }

    /// Makes cleanup leave its sockets for the bridge to force-close.
    pub fn skip_cleanup_removals(&mut self) {
        self.skip_cleanup_removals = true;
    }

    pub fn assigned_key(&self, fd: RawFd) -> Option<SocketKey> {
        self.assigned.get(&fd).copied()
    }

    pub fn drives(&self) -> &[DriveTarget] {
        &self.drives
    }

    pub fn shutdowns(&self) -> &[ShutdownMode] {
        &self.shutdowns
    }

    fn remove_all(&self, changes: &mut InterestChanges) {
        let mut fds: Vec<RawFd> = self.assigned.keys().copied().collect();
        fds.sort_unstable();
        for fd in fds {
            self.emit(ScriptedChange::remove(fd), changes);
        }
    }
}

impl TransferEngine for ScriptedEngine {
    fn drive(
        &mut self,
        target: DriveTarget,
        changes: &mut InterestChanges,
    ) -> Result<(), TransferError> {
        self.drives.push(target);

        let reaction = self
            .reactions
            .get_mut(&target)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        for change in reaction {
            self.emit(change, changes);
        }

        match self.pending_failure.take() {
            Some(reason) => Err(TransferError::Engine { reason }),
            None => Ok(()),
        }
    }

    fn assign(&mut self, fd: RawFd, key: Option<SocketKey>) {
        match key {
            Some(key) => {
                self.assigned.insert(fd, key);
            }
            None => {
                self.assigned.remove(&fd);
            }
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn active_transfers(&self) -> usize {
        self.active
    }

    fn begin_shutdown(&mut self, mode: ShutdownMode, changes: &mut InterestChanges) {
        self.shutdowns.push(mode);
        if mode == ShutdownMode::Quick {
            self.active = 0;
            self.remove_all(changes);
        }
    }

    fn cleanup(&mut self, changes: &mut InterestChanges) {
        if !self.skip_cleanup_removals {
            self.remove_all(changes);
        }
    }
}
