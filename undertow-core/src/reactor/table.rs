//! Per-token interest bookkeeping shared by reactor implementations.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;

use super::{Interest, Token};

/// Registration state for one open token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub fd: RawFd,
    pub interest: Interest,
}

/// Table of open tokens and the interest inserted for each.
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: HashMap<Token, Registration>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `token` for `fd` with empty interest.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::AlreadyExists` - Token is already open
    pub fn open(&mut self, token: Token, fd: RawFd) -> io::Result<()> {
        if let Some(existing) = self.entries.get(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("token {} already open for fd {}", token.0, existing.fd),
            ));
        }

        self.entries.insert(
            token,
            Registration {
                fd,
                interest: Interest::default(),
            },
        );
        Ok(())
    }

    /// Removes `token`, returning its last registration.
    pub fn close(&mut self, token: Token) -> Option<Registration> {
        self.entries.remove(&token)
    }

    /// Applies `update` to the interest of `token`.
    ///
    /// Returns the interest before and after the update.
    ///
    /// # Errors
    ///
    /// - `io::ErrorKind::NotFound` - Token is not open
    pub fn update(
        &mut self,
        token: Token,
        update: impl FnOnce(&mut Interest),
    ) -> io::Result<(Interest, Interest)> {
        let registration = self.entries.get_mut(&token).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("token {} is not open", token.0),
            )
        })?;

        let before = registration.interest;
        update(&mut registration.interest);
        Ok((before, registration.interest))
    }

    pub fn get(&self, token: Token) -> Option<&Registration> {
        self.entries.get(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.entries.keys().copied()
    }

    /// Empties the table, returning every registration that was still open.
    pub fn drain(&mut self) -> Vec<(Token, Registration)> {
        self.entries.drain().collect()
    }
}
