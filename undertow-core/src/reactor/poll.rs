//! Production reactor backed by `mio::Poll`.

use std::collections::HashSet;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll};

use super::{Interest, Reactor, Readiness, RegistrationTable, SocketEvent, Token};
use crate::config::ReactorConfig;

/// Reactor that multiplexes raw descriptors through `mio`.
///
/// Read and write interest map onto `mio::Interest`. `mio` has no error-only
/// interest, so a descriptor holding error interest is registered readable.
/// Read readiness nobody asked for is dropped, and a hang-up on a direction
/// that is not wanted is reported as an error instead.
pub struct MioReactor {
    poll: Poll,
    events: Events,
    table: RegistrationTable,
    /// Tokens currently registered with the OS poller
    in_poller: HashSet<Token>,
}

impl MioReactor {
    /// Creates a reactor with an event buffer sized from `config`.
    ///
    /// # Errors
    ///
    /// - Any OS error raised while creating the poll instance
    pub fn new(config: &ReactorConfig) -> io::Result<Self> {
        let poll = Poll::new()?;

        tracing::debug!(max_events = config.max_events, "Reactor opened");

        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_events),
            table: RegistrationTable::new(),
            in_poller: HashSet::new(),
        })
    }

    /// Applies an interest update and mirrors it into the OS poller.
    ///
    /// The table change is rolled back if the poller rejects it.
    fn apply(&mut self, token: Token, update: impl FnOnce(&mut Interest)) -> io::Result<()> {
        let (before, after) = self.table.update(token, update)?;
        if before == after {
            return Ok(());
        }

        if let Err(e) = self.sync_poller(token) {
            self.table.update(token, |interest| *interest = before)?;
            return Err(e);
        }
        Ok(())
    }

    fn sync_poller(&mut self, token: Token) -> io::Result<()> {
        let Some(registration) = self.table.get(token) else {
            return Ok(());
        };

        let fd = registration.fd;
        let wanted = mio_interest(registration.interest);
        let registered = self.in_poller.contains(&token);
        let registry = self.poll.registry();

        match (wanted, registered) {
            (Some(interest), false) => {
                registry.register(&mut SourceFd(&fd), token, interest)?;
                self.in_poller.insert(token);
            }
            (Some(interest), true) => {
                registry.reregister(&mut SourceFd(&fd), token, interest)?;
            }
            (None, true) => {
                registry.deregister(&mut SourceFd(&fd))?;
                self.in_poller.remove(&token);
            }
            (None, false) => {}
        }
        Ok(())
    }

    fn deregister_fd(&mut self, token: Token, fd: RawFd) {
        if !self.in_poller.remove(&token) {
            return;
        }

        // The descriptor may already be closed by its owner; the kernel drops
        // closed descriptors from the epoll set on its own.
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            tracing::trace!(fd, error = %e, "Deregister of closed descriptor failed");
        }
    }
}

fn mio_interest(interest: Interest) -> Option<mio::Interest> {
    match (interest.read || interest.error, interest.write) {
        (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
        (true, false) => Some(mio::Interest::READABLE),
        (false, true) => Some(mio::Interest::WRITABLE),
        (false, false) => None,
    }
}

/// Whether `event` carries a failure the owner of `interest` must hear about.
fn is_failure(event: &mio::event::Event, interest: Interest) -> bool {
    event.is_error()
        || (!interest.read && event.is_read_closed())
        || (!interest.write && event.is_write_closed())
}

impl Reactor for MioReactor {
    fn open(&mut self, token: Token, fd: RawFd) -> io::Result<()> {
        self.table.open(token, fd)?;
        tracing::trace!(fd, token = token.0, "Descriptor opened");
        Ok(())
    }

    fn closed(&mut self, token: Token) {
        match self.table.close(token) {
            Some(registration) => {
                self.deregister_fd(token, registration.fd);
                tracing::trace!(fd = registration.fd, token = token.0, "Descriptor closed");
            }
            None => tracing::warn!(token = token.0, "Close requested for unknown token"),
        }
    }

    fn insert_read(&mut self, token: Token) -> io::Result<()> {
        self.apply(token, |i| i.read = true)
    }

    fn remove_read(&mut self, token: Token) -> io::Result<()> {
        self.apply(token, |i| i.read = false)
    }

    fn insert_write(&mut self, token: Token) -> io::Result<()> {
        self.apply(token, |i| i.write = true)
    }

    fn remove_write(&mut self, token: Token) -> io::Result<()> {
        self.apply(token, |i| i.write = false)
    }

    fn insert_error(&mut self, token: Token) -> io::Result<()> {
        self.apply(token, |i| i.error = true)
    }

    fn remove_error(&mut self, token: Token) -> io::Result<()> {
        self.apply(token, |i| i.error = false)
    }

    fn interest(&self, token: Token) -> Option<Interest> {
        self.table.get(token).map(|r| r.interest)
    }

    fn open_count(&self) -> usize {
        self.table.len()
    }

    fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let token = event.token();
            let Some(registration) = self.table.get(token) else {
                continue;
            };
            let interest = registration.interest;

            if interest.error && is_failure(event, interest) {
                ready.push(Readiness::new(token, SocketEvent::Error));
            }
            if interest.read && (event.is_readable() || event.is_read_closed()) {
                ready.push(Readiness::new(token, SocketEvent::Read));
            }
            if interest.write && (event.is_writable() || event.is_write_closed()) {
                ready.push(Readiness::new(token, SocketEvent::Write));
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        let dangling = self.table.drain();
        if !dangling.is_empty() {
            tracing::warn!(
                count = dangling.len(),
                "Reactor released with dangling registrations"
            );
        }
        for (token, registration) in dangling {
            self.deregister_fd(token, registration.fd);
        }
        tracing::debug!("Reactor released");
    }
}
