//! Reactor registration object for one engine socket.

use std::fmt;
use std::os::fd::RawFd;

use crate::reactor::{Reactor, SocketEvent, Token};

use super::DriveTarget;

/// Identifier the bridge hands to the engine for a live socket.
///
/// The engine echoes it back with later notifications for the same
/// descriptor. The generation distinguishes sockets that reuse a descriptor
/// number, so a stale identifier never resolves to a newer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketKey {
    fd: RawFd,
    generation: u64,
}

impl SocketKey {
    pub fn new(fd: RawFd, generation: u64) -> Self {
        Self { fd, generation }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reactor token the socket is registered under.
    pub fn token(&self) -> Token {
        token_for(self.fd)
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {} (generation {})", self.fd, self.generation)
    }
}

/// Reactor token used for engine descriptor `fd`.
pub fn token_for(fd: RawFd) -> Token {
    Token(fd as usize)
}

/// Live registration of one engine socket with the reactor.
///
/// Owned exclusively by the transfer stack. A handle is open from the moment
/// it is created until [`SocketHandle::close`] consumes it.
#[derive(Debug)]
pub struct SocketHandle {
    key: SocketKey,
    open: bool,
}

impl SocketHandle {
    pub(crate) fn new(key: SocketKey) -> Self {
        Self { key, open: true }
    }

    pub fn fd(&self) -> RawFd {
        self.key.fd
    }

    pub fn key(&self) -> SocketKey {
        self.key
    }

    pub fn token(&self) -> Token {
        self.key.token()
    }

    /// Engine work item for a readiness event on this socket.
    pub fn drive_target(&self, event: SocketEvent) -> DriveTarget {
        DriveTarget::Socket {
            fd: self.key.fd,
            event,
        }
    }

    /// Removes every reactor registration for this socket and consumes it.
    pub(crate) fn close<R: Reactor>(mut self, reactor: &mut R) {
        reactor.closed(self.token());
        self.open = false;
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if self.open && !std::thread::panicking() {
            tracing::error!(
                socket = %self.key,
                "Socket handle dropped while still registered with the reactor"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::{ReactorCall, RecordingReactor};

    #[test]
    fn test_close_clears_reactor_registration() {
        let mut reactor = RecordingReactor::new();
        let journal = reactor.journal();
        let key = SocketKey::new(7, 1);

        reactor.open(key.token(), 7).unwrap();
        reactor.insert_error(key.token()).unwrap();

        let handle = SocketHandle::new(key);
        handle.close(&mut reactor);

        assert!(!reactor.is_open(Token(7)));
        assert_eq!(journal.calls().last(), Some(&ReactorCall::Closed(Token(7))));
    }

    #[test]
    fn test_drive_target_tags_event() {
        let handle = SocketHandle::new(SocketKey::new(11, 4));
        assert_eq!(
            handle.drive_target(SocketEvent::Write),
            DriveTarget::Socket {
                fd: 11,
                event: SocketEvent::Write
            }
        );
    }

    #[test]
    fn test_key_display() {
        assert_eq!(SocketKey::new(3, 9).to_string(), "fd 3 (generation 9)");
    }
}
