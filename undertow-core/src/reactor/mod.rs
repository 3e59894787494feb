//! Readiness reactor used by the daemon's single-threaded event loop.
//!
//! Components register file descriptors under a [`Token`] and toggle read,
//! write and error interest independently. The loop then calls
//! [`Reactor::poll`] and routes each [`Readiness`] back to the owner of the
//! token.
//!
//! # Implementations
//! - [`MioReactor`]: production reactor on top of `mio::Poll`
//! - [`RecordingReactor`]: journaling reactor for tests (`test-utils`)

pub mod poll;
#[cfg(any(test, feature = "test-utils"))]
pub mod recording;
pub mod table;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub use mio::Token;
pub use poll::MioReactor;
#[cfg(any(test, feature = "test-utils"))]
pub use recording::{ReactorCall, ReactorJournal, RecordingReactor};
pub use table::{Registration, RegistrationTable};

/// Kind of readiness reported for a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    /// Descriptor is readable (or the peer closed its write side)
    Read,
    /// Descriptor is writable
    Write,
    /// Descriptor reported an error condition
    Error,
}

impl std::fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketEvent::Read => write!(f, "read"),
            SocketEvent::Write => write!(f, "write"),
            SocketEvent::Error => write!(f, "error"),
        }
    }
}

/// One readiness notification produced by [`Reactor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub event: SocketEvent,
}

impl Readiness {
    pub fn new(token: Token, event: SocketEvent) -> Self {
        Self { token, event }
    }
}

/// Interest currently inserted for one open token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
    pub error: bool,
}

impl Interest {
    /// Returns true if no kind of readiness is wanted.
    pub fn is_empty(&self) -> bool {
        !self.read && !self.write && !self.error
    }
}

/// Registration contract between the event loop and its I/O owners.
///
/// `open` must precede any `insert_*` call for a token and `closed` removes
/// every remaining interest. Inserting interest that is already present and
/// removing interest that is absent are both no-ops from the reactor's point
/// of view; owners are still expected to only remove what they inserted.
pub trait Reactor {
    /// Starts tracking `fd` under `token` with no interest.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::AlreadyExists` - Token is already open
    /// - Any OS error raised while preparing the descriptor
    fn open(&mut self, token: Token, fd: RawFd) -> io::Result<()>;

    /// Stops tracking `token` and drops all of its interest.
    fn closed(&mut self, token: Token);

    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    /// - Any OS error raised by the poller registration
    fn insert_read(&mut self, token: Token) -> io::Result<()>;

    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    fn remove_read(&mut self, token: Token) -> io::Result<()>;

    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    /// - Any OS error raised by the poller registration
    fn insert_write(&mut self, token: Token) -> io::Result<()>;

    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    fn remove_write(&mut self, token: Token) -> io::Result<()>;

    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    fn insert_error(&mut self, token: Token) -> io::Result<()>;

    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    fn remove_error(&mut self, token: Token) -> io::Result<()>;

    /// Returns the interest inserted for `token`, or `None` if it is not open.
    fn interest(&self, token: Token) -> Option<Interest>;

    /// Returns true if `token` is currently open.
    fn is_open(&self, token: Token) -> bool {
        self.interest(token).is_some()
    }

    /// Number of tokens currently open.
    fn open_count(&self) -> usize;

    /// Waits up to `timeout` for readiness and appends it to `ready`.
    ///
    /// Only readiness matching inserted interest is reported. An interrupted
    /// wait returns successfully with nothing appended.
    ///
    /// # Errors
    ///
    /// - Any OS error raised by the underlying poller
    fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()>;

    /// Releases the reactor. Tokens still open at this point are dangling
    /// registrations and are dropped.
    fn release(&mut self);
}
