//! Journaling reactor for tests.
//!
//! Records every registration call into a shared journal that outlives the
//! reactor itself, so tests can assert teardown ordering after the owning
//! controller has released and dropped it.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use super::{Interest, Reactor, Readiness, RegistrationTable, Token};

/// One call made against a [`RecordingReactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorCall {
    Open(Token),
    Closed(Token),
    InsertRead(Token),
    RemoveRead(Token),
    InsertWrite(Token),
    RemoveWrite(Token),
    InsertError(Token),
    RemoveError(Token),
    Poll,
    Released,
}

/// Shared, clonable view of the calls made against a reactor.
#[derive(Debug, Clone, Default)]
pub struct ReactorJournal {
    calls: Rc<RefCell<Vec<ReactorCall>>>,
}

impl ReactorJournal {
    fn record(&self, call: ReactorCall) {
        self.calls.borrow_mut().push(call);
    }

    /// Returns a snapshot of every recorded call.
    pub fn calls(&self) -> Vec<ReactorCall> {
        self.calls.borrow().clone()
    }

    /// Returns the recorded calls that concern `token`.
    pub fn calls_for(&self, token: Token) -> Vec<ReactorCall> {
        self.calls
            .borrow()
            .iter()
            .copied()
            .filter(|call| call_token(*call) == Some(token))
            .collect()
    }

    /// Position of the first occurrence of `call`, if any.
    pub fn position(&self, call: ReactorCall) -> Option<usize> {
        self.calls.borrow().iter().position(|c| *c == call)
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

fn call_token(call: ReactorCall) -> Option<Token> {
    match call {
        ReactorCall::Open(t)
        | ReactorCall::Closed(t)
        | ReactorCall::InsertRead(t)
        | ReactorCall::RemoveRead(t)
        | ReactorCall::InsertWrite(t)
        | ReactorCall::RemoveWrite(t)
        | ReactorCall::InsertError(t)
        | ReactorCall::RemoveError(t) => Some(t),
        ReactorCall::Poll | ReactorCall::Released => None,
    }
}

/// Reactor that keeps registrations in memory and serves scripted readiness.
#[derive(Debug, Default)]
pub struct RecordingReactor {
    table: RegistrationTable,
    journal: ReactorJournal,
    scripted: VecDeque<Vec<Readiness>>,
    failing_fds: HashSet<RawFd>,
    released: bool,
}

impl RecordingReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the journal that stays valid after the reactor is dropped.
    pub fn journal(&self) -> ReactorJournal {
        self.journal.clone()
    }

    /// Queues a batch of readiness returned by the next `poll` call.
    ///
    /// Batches are returned verbatim, including readiness that no longer
    /// matches inserted interest, to exercise stale-event handling.
    pub fn script_batch(&mut self, batch: Vec<Readiness>) {
        self.scripted.push_back(batch);
    }

    /// Makes `open` fail for `fd` as if the process ran out of descriptors.
    pub fn fail_open_for(&mut self, fd: RawFd) {
        self.failing_fds.insert(fd);
    }

    /// Number of live registrations for `token`: always 0 or 1.
    pub fn registration_count(&self, token: Token) -> usize {
        usize::from(self.table.get(token).is_some())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn update(&mut self, token: Token, update: impl FnOnce(&mut Interest)) -> io::Result<()> {
        self.table.update(token, update).map(|_| ())
    }
}

impl Reactor for RecordingReactor {
    fn open(&mut self, token: Token, fd: RawFd) -> io::Result<()> {
        if self.failing_fds.contains(&fd) {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        self.table.open(token, fd)?;
        self.journal.record(ReactorCall::Open(token));
        Ok(())
    }

    fn closed(&mut self, token: Token) {
        self.table.close(token);
        self.journal.record(ReactorCall::Closed(token));
    }

    fn insert_read(&mut self, token: Token) -> io::Result<()> {
        self.update(token, |i| i.read = true)?;
        self.journal.record(ReactorCall::InsertRead(token));
        Ok(())
    }

    fn remove_read(&mut self, token: Token) -> io::Result<()> {
        self.update(token, |i| i.read = false)?;
        self.journal.record(ReactorCall::RemoveRead(token));
        Ok(())
    }

    fn insert_write(&mut self, token: Token) -> io::Result<()> {
        self.update(token, |i| i.write = true)?;
        self.journal.record(ReactorCall::InsertWrite(token));
        Ok(())
    }

    fn remove_write(&mut self, token: Token) -> io::Result<()> {
        self.update(token, |i| i.write = false)?;
        self.journal.record(ReactorCall::RemoveWrite(token));
        Ok(())
    }

    fn insert_error(&mut self, token: Token) -> io::Result<()> {
        self.update(token, |i| i.error = true)?;
        self.journal.record(ReactorCall::InsertError(token));
        Ok(())
    }

    fn remove_error(&mut self, token: Token) -> io::Result<()> {
        self.update(token, |i| i.error = false)?;
        self.journal.record(ReactorCall::RemoveError(token));
        Ok(())
    }

    fn interest(&self, token: Token) -> Option<Interest> {
        self.table.get(token).map(|r| r.interest)
    }

    fn open_count(&self) -> usize {
        self.table.len()
    }

    fn poll(&mut self, _timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()> {
        self.journal.record(ReactorCall::Poll);
        if let Some(batch) = self.scripted.pop_front() {
            ready.extend(batch);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.table.drain();
        self.released = true;
        self.journal.record(ReactorCall::Released);
    }
}
