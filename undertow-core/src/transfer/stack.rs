//! Transfer stack: owns the engine and the reactor registrations of its sockets.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Instant;

use super::{
    DriveTarget, InterestAction, InterestChange, InterestChanges, SocketHandle, SocketKey,
    TransferEngine, TransferError,
};
use crate::config::TransferConfig;
use crate::control::ShutdownMode;
use crate::reactor::{Reactor, Readiness, SocketEvent};

/// Keeps the reactor's registration table in lock-step with the transfer
/// engine's socket interest and pumps the engine on readiness.
///
/// The stack never holds the reactor; every operation that touches
/// registrations borrows it for the duration of the call. Exactly one
/// [`SocketHandle`] exists per descriptor the engine is using.
pub struct TransferStack<E: TransferEngine> {
    engine: E,
    config: TransferConfig,
    sockets: HashMap<RawFd, SocketHandle>,
    next_generation: u64,
    timer_deadline: Option<Instant>,
    shutdown: Option<ShutdownMode>,
}

impl<E: TransferEngine> TransferStack<E> {
    pub fn new(engine: E, config: TransferConfig) -> Self {
        Self {
            engine,
            config,
            sockets: HashMap::new(),
            next_generation: 0,
            timer_deadline: None,
            shutdown: None,
        }
    }

    /// Prepares the stack for use with `reactor`.
    ///
    /// # Errors
    ///
    /// - Any `TransferError` raised while applying the engine's initial
    ///   socket interest
    pub fn initialize<R: Reactor>(&mut self, reactor: &mut R) -> Result<(), TransferError> {
        let mut changes = InterestChanges::new();
        let result = self.apply_changes(reactor, &mut changes);
        self.refresh_timer(Instant::now());

        tracing::info!(
            max_live_sockets = self.config.max_live_sockets,
            "Transfer stack initialized"
        );
        result
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Direct engine access. Interest changes must go through [`Self::perform`].
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Number of sockets currently registered with the reactor.
    pub fn live_sockets(&self) -> usize {
        self.sockets.len()
    }

    pub fn socket(&self, fd: RawFd) -> Option<&SocketHandle> {
        self.sockets.get(&fd)
    }

    /// When the engine timer next needs driving.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer_deadline
    }

    pub fn shutdown_mode(&self) -> Option<ShutdownMode> {
        self.shutdown
    }

    /// Hands work to the engine and applies the interest changes it queues.
    ///
    /// # Errors
    ///
    /// - `TransferError::ShuttingDown` - Shutdown has begun
    /// - Any `TransferError` raised while applying the queued changes
    pub fn perform<R, T>(
        &mut self,
        reactor: &mut R,
        work: impl FnOnce(&mut E, &mut InterestChanges) -> T,
    ) -> Result<T, TransferError>
    where
        R: Reactor,
    {
        if self.shutdown.is_some() {
            return Err(TransferError::ShuttingDown);
        }

        let mut changes = InterestChanges::new();
        let output = work(&mut self.engine, &mut changes);
        self.apply_changes(reactor, &mut changes)?;
        self.refresh_timer(Instant::now());
        Ok(output)
    }

    /// Applies one interest notification from the engine.
    ///
    /// # Panics
    ///
    /// Panics on protocol desync: a `Remove` or other notification whose
    /// associated key does not resolve to the live, registered socket.
    ///
    /// # Errors
    ///
    /// - `TransferError::InvalidDescriptor` - Negative descriptor
    /// - `TransferError::SocketLimit` - Too many live sockets
    /// - `TransferError::SocketOpen` - Reactor refused the descriptor
    /// - `TransferError::Registration` - Reactor refused an interest update
    pub fn handle_interest_change<R: Reactor>(
        &mut self,
        reactor: &mut R,
        change: InterestChange,
    ) -> Result<(), TransferError> {
        if change.action == InterestAction::Remove {
            self.remove_socket(reactor, change);
            return Ok(());
        }

        if change.fd < 0 {
            return Err(TransferError::InvalidDescriptor { fd: change.fd });
        }

        let key = match change.associated {
            Some(key) => self.resolve(key, change.fd),
            None => match self.sockets.get(&change.fd) {
                Some(handle) => handle.key(),
                None => self.establish(reactor, change.fd)?,
            },
        };

        self.apply_interest(reactor, key, change.read, change.write)
    }

    /// Routes reactor readiness to the socket it belongs to.
    ///
    /// # Errors
    ///
    /// - `TransferError::Engine` - Engine failed while processing the event
    /// - Any `TransferError` raised while applying resulting changes
    pub fn dispatch<R: Reactor>(
        &mut self,
        reactor: &mut R,
        readiness: Readiness,
    ) -> Result<(), TransferError> {
        let fd = readiness.token.0 as RawFd;
        match readiness.event {
            SocketEvent::Read => self.on_readable(reactor, fd),
            SocketEvent::Write => self.on_writable(reactor, fd),
            SocketEvent::Error => self.on_error(reactor, fd),
        }
    }

    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn on_readable<R: Reactor>(&mut self, reactor: &mut R, fd: RawFd) -> Result<(), TransferError> {
        self.drive_socket(reactor, fd, SocketEvent::Read)
    }

    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn on_writable<R: Reactor>(&mut self, reactor: &mut R, fd: RawFd) -> Result<(), TransferError> {
        self.drive_socket(reactor, fd, SocketEvent::Write)
    }

    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn on_error<R: Reactor>(&mut self, reactor: &mut R, fd: RawFd) -> Result<(), TransferError> {
        self.drive_socket(reactor, fd, SocketEvent::Error)
    }

    /// Drives the engine timer.
    ///
    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn on_timeout<R: Reactor>(&mut self, reactor: &mut R) -> Result<(), TransferError> {
        self.timer_deadline = None;
        self.drive(reactor, DriveTarget::Timeout)
    }

    /// Drives the engine timer if its deadline has passed.
    ///
    /// Returns whether the timer fired.
    ///
    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn run_timers<R: Reactor>(
        &mut self,
        reactor: &mut R,
        now: Instant,
    ) -> Result<bool, TransferError> {
        match self.timer_deadline {
            Some(deadline) if deadline <= now => self.on_timeout(reactor).map(|()| true),
            _ => Ok(false),
        }
    }

    /// Tells the engine to wind down. Quick shutdown supersedes normal and
    /// each mode is only forwarded once.
    ///
    /// # Errors
    ///
    /// - Any `TransferError` raised while applying the engine's removals
    pub fn begin_shutdown<R: Reactor>(
        &mut self,
        reactor: &mut R,
        mode: ShutdownMode,
    ) -> Result<(), TransferError> {
        if self.shutdown == Some(ShutdownMode::Quick) || self.shutdown == Some(mode) {
            return Ok(());
        }

        tracing::info!(
            %mode,
            live_sockets = self.sockets.len(),
            active_transfers = self.engine.active_transfers(),
            "Transfer stack shutting down"
        );
        self.shutdown = Some(mode);

        let mut changes = InterestChanges::new();
        self.engine.begin_shutdown(mode, &mut changes);
        let result = self.apply_changes(reactor, &mut changes);
        self.refresh_timer(Instant::now());
        result
    }

    /// True once the engine has no transfers in flight.
    pub fn is_shutdown_completed(&self) -> bool {
        self.engine.active_transfers() == 0
    }

    /// Tears down every socket registration.
    ///
    /// The engine gets a chance to remove its sockets first; any handle still
    /// live afterwards is closed here so no registration outlives the stack.
    /// Returns the number of handles that had to be force-closed.
    pub fn cleanup<R: Reactor>(&mut self, reactor: &mut R) -> usize {
        let mut changes = InterestChanges::new();
        self.engine.cleanup(&mut changes);
        if let Err(e) = self.apply_changes(reactor, &mut changes) {
            tracing::warn!(error = %e, "Engine cleanup left interest changes unapplied");
        }

        let forced = self.sockets.len();
        if forced > 0 {
            tracing::warn!(count = forced, "Force-closing sockets still held by the engine");
        }
        for (fd, handle) in self.sockets.drain() {
            handle.close(reactor);
            self.engine.assign(fd, None);
        }
        self.timer_deadline = None;

        tracing::info!("Transfer stack cleaned up");
        forced
    }

    /// Applies every queued change, continuing past failures.
    ///
    /// Returns the first failure once the queue is empty.
    fn apply_changes<R: Reactor>(
        &mut self,
        reactor: &mut R,
        changes: &mut InterestChanges,
    ) -> Result<(), TransferError> {
        let mut first_error = None;

        while let Some(change) = changes.pop() {
            if let Err(e) = self.handle_interest_change(reactor, change) {
                tracing::warn!(fd = change.fd, action = ?change.action, error = %e, "Interest change failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn drive_socket<R: Reactor>(
        &mut self,
        reactor: &mut R,
        fd: RawFd,
        event: SocketEvent,
    ) -> Result<(), TransferError> {
        let Some(handle) = self.sockets.get(&fd) else {
            tracing::trace!(fd, %event, "Dropping readiness for closed socket");
            return Ok(());
        };

        let wanted = reactor
            .interest(handle.token())
            .is_some_and(|interest| match event {
                SocketEvent::Read => interest.read,
                SocketEvent::Write => interest.write,
                SocketEvent::Error => interest.error,
            });
        if !wanted {
            tracing::trace!(fd, %event, "Dropping readiness for withdrawn interest");
            return Ok(());
        }

        let target = handle.drive_target(event);
        self.drive(reactor, target)
    }

    fn drive<R: Reactor>(&mut self, reactor: &mut R, target: DriveTarget) -> Result<(), TransferError> {
        let mut changes = InterestChanges::new();
        let driven = self.engine.drive(target, &mut changes);
        let applied = self.apply_changes(reactor, &mut changes);
        self.refresh_timer(Instant::now());
        driven.and(applied)
    }

    fn refresh_timer(&mut self, now: Instant) {
        self.timer_deadline = self.engine.next_timeout().map(|delay| now + delay);
    }

    /// Returns `key` if it names the live socket for `fd`, panicking otherwise.
    fn resolve(&self, key: SocketKey, fd: RawFd) -> SocketKey {
        let live = self.sockets.get(&fd).map(SocketHandle::key);
        if key.fd() != fd || live != Some(key) {
            panic!("protocol desync: notification for fd {fd} carries stale socket {key}");
        }
        key
    }

    fn establish<R: Reactor>(&mut self, reactor: &mut R, fd: RawFd) -> Result<SocketKey, TransferError> {
        let limit = self.config.max_live_sockets;
        if self.sockets.len() >= limit {
            return Err(TransferError::SocketLimit { fd, limit });
        }

        self.next_generation += 1;
        let key = SocketKey::new(fd, self.next_generation);
        let token = key.token();

        reactor
            .open(token, fd)
            .map_err(|source| TransferError::SocketOpen { fd, source })?;

        // The engine has no way to ask for error readiness, so every live
        // socket watches for it.
        if let Err(source) = reactor.insert_error(token) {
            reactor.closed(token);
            return Err(TransferError::Registration { fd, source });
        }

        self.sockets.insert(fd, SocketHandle::new(key));
        self.engine.assign(fd, Some(key));

        tracing::debug!(socket = %key, "Engine socket established");
        Ok(key)
    }

    fn apply_interest<R: Reactor>(
        &mut self,
        reactor: &mut R,
        key: SocketKey,
        read: bool,
        write: bool,
    ) -> Result<(), TransferError> {
        let fd = key.fd();
        let token = key.token();
        let current = reactor.interest(token).unwrap_or_default();
        let registration = |source: io::Error| TransferError::Registration { fd, source };

        if read {
            reactor.insert_read(token).map_err(registration)?;
        } else if current.read {
            reactor.remove_read(token).map_err(registration)?;
        }

        if write {
            reactor.insert_write(token).map_err(registration)?;
        } else if current.write {
            reactor.remove_write(token).map_err(registration)?;
        }

        tracing::trace!(socket = %key, read, write, "Socket interest applied");
        Ok(())
    }

    fn remove_socket<R: Reactor>(&mut self, reactor: &mut R, change: InterestChange) {
        let Some(key) = change.associated else {
            // Removal can race an establish the bridge never completed.
            tracing::debug!(fd = change.fd, "Ignoring remove without associated socket");
            return;
        };

        match self.sockets.remove(&key.fd()) {
            Some(handle)
                if key.fd() == change.fd
                    && handle.key() == key
                    && reactor.is_open(key.token()) =>
            {
                handle.close(reactor);
                self.engine.assign(key.fd(), None);
                tracing::debug!(socket = %key, "Engine socket removed");
            }
            Some(handle) => {
                let live = handle.key();
                self.sockets.insert(live.fd(), handle);
                panic!(
                    "protocol desync: remove for fd {} names socket {key} but {live} is live",
                    change.fd
                );
            }
            None => panic!(
                "protocol desync: remove for fd {} names socket {key} which is not registered",
                change.fd
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reactor::{Interest, ReactorCall, RecordingReactor, Token};
    use crate::transfer::test_mocks::{ScriptedChange, ScriptedEngine};

    fn stack() -> (TransferStack<ScriptedEngine>, RecordingReactor) {
        (
            TransferStack::new(ScriptedEngine::new(), TransferConfig::default()),
            RecordingReactor::new(),
        )
    }

    fn interest(reactor: &RecordingReactor, fd: RawFd) -> Option<Interest> {
        reactor.interest(Token(fd as usize))
    }

    #[test]
    fn test_establish_modify_remove_scenario() {
        let (mut stack, mut reactor) = stack();

        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(7, true, false))
            .unwrap();
        let key = stack.engine().assigned_key(7).unwrap();
        assert_eq!(
            interest(&reactor, 7),
            Some(Interest {
                read: true,
                write: false,
                error: true
            })
        );

        stack
            .handle_interest_change(&mut reactor, InterestChange::modify(7, Some(key), false, true))
            .unwrap();
        assert_eq!(
            interest(&reactor, 7),
            Some(Interest {
                read: false,
                write: true,
                error: true
            })
        );

        stack
            .handle_interest_change(&mut reactor, InterestChange::remove(7, Some(key)))
            .unwrap();
        assert_eq!(interest(&reactor, 7), None);
        assert_eq!(stack.live_sockets(), 0);
        assert!(stack.engine().assigned_key(7).is_none());
    }

    #[test]
    #[should_panic(expected = "protocol desync")]
    fn test_second_remove_is_fatal() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(7, true, false))
            .unwrap();
        let key = stack.engine().assigned_key(7).unwrap();

        stack
            .handle_interest_change(&mut reactor, InterestChange::remove(7, Some(key)))
            .unwrap();
        let _ = stack.handle_interest_change(&mut reactor, InterestChange::remove(7, Some(key)));
    }

    #[test]
    #[should_panic(expected = "protocol desync")]
    fn test_remove_of_never_established_socket_is_fatal() {
        let (mut stack, mut reactor) = stack();
        let _ = stack.handle_interest_change(
            &mut reactor,
            InterestChange::remove(12, Some(SocketKey::new(12, 1))),
        );
    }

    #[test]
    fn test_remove_without_associated_socket_is_noop() {
        let (mut stack, mut reactor) = stack();
        let journal = reactor.journal();

        stack
            .handle_interest_change(&mut reactor, InterestChange::remove(3, None))
            .unwrap();

        assert!(journal.calls().is_empty());
        assert_eq!(stack.live_sockets(), 0);
    }

    #[test]
    fn test_identical_notification_is_idempotent() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(5, true, true))
            .unwrap();
        let key = stack.engine().assigned_key(5).unwrap();
        let first = interest(&reactor, 5);

        stack
            .handle_interest_change(&mut reactor, InterestChange::modify(5, Some(key), true, true))
            .unwrap();
        stack
            .handle_interest_change(&mut reactor, InterestChange::modify(5, Some(key), true, true))
            .unwrap();

        assert_eq!(interest(&reactor, 5), first);
        assert_eq!(reactor.registration_count(Token(5)), 1);
        assert_eq!(stack.live_sockets(), 1);
    }

    #[test]
    fn test_establish_never_removes_interest_it_did_not_insert() {
        let (mut stack, mut reactor) = stack();
        let journal = reactor.journal();

        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(9, false, false))
            .unwrap();

        assert_eq!(
            journal.calls(),
            vec![
                ReactorCall::Open(Token(9)),
                ReactorCall::InsertError(Token(9)),
            ]
        );
    }

    #[test]
    fn test_unassociated_notification_reuses_live_socket() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(6, true, false))
            .unwrap();
        let key = stack.engine().assigned_key(6).unwrap();

        stack
            .handle_interest_change(&mut reactor, InterestChange::modify(6, None, false, true))
            .unwrap();

        assert_eq!(stack.socket(6).map(SocketHandle::key), Some(key));
        assert_eq!(reactor.registration_count(Token(6)), 1);
        assert!(interest(&reactor, 6).is_some_and(|i| i.write && !i.read));
    }

    #[test]
    #[should_panic(expected = "stale socket")]
    fn test_stale_key_after_descriptor_reuse_is_fatal() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(4, true, false))
            .unwrap();
        let old = stack.engine().assigned_key(4).unwrap();
        stack
            .handle_interest_change(&mut reactor, InterestChange::remove(4, Some(old)))
            .unwrap();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(4, true, false))
            .unwrap();

        let _ = stack
            .handle_interest_change(&mut reactor, InterestChange::modify(4, Some(old), false, true));
    }

    #[test]
    fn test_open_failure_surfaces_resource_exhaustion() {
        let (mut stack, mut reactor) = stack();
        reactor.fail_open_for(21);

        let err = stack
            .handle_interest_change(&mut reactor, InterestChange::establish(21, true, false))
            .unwrap_err();

        assert!(matches!(err, TransferError::SocketOpen { fd: 21, .. }));
        assert!(err.is_resource_exhaustion());
        assert_eq!(stack.live_sockets(), 0);
        assert!(stack.engine().assigned_key(21).is_none());
        assert_eq!(reactor.open_count(), 0);
    }

    #[test]
    fn test_socket_limit_is_enforced() {
        let mut stack = TransferStack::new(
            ScriptedEngine::new(),
            TransferConfig {
                max_live_sockets: 1,
            },
        );
        let mut reactor = RecordingReactor::new();

        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(1, true, false))
            .unwrap();
        let err = stack
            .handle_interest_change(&mut reactor, InterestChange::establish(2, true, false))
            .unwrap_err();

        assert!(matches!(err, TransferError::SocketLimit { fd: 2, limit: 1 }));
        assert!(err.is_resource_exhaustion());
        assert!(!reactor.is_open(Token(2)));
    }

    #[test]
    fn test_negative_descriptor_is_rejected() {
        let (mut stack, mut reactor) = stack();
        let err = stack
            .handle_interest_change(&mut reactor, InterestChange::establish(-1, true, false))
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDescriptor { fd: -1 }));
    }

    #[test]
    fn test_readiness_drives_engine_and_applies_changes() {
        let (mut stack, mut reactor) = stack();
        stack
            .perform(&mut reactor, |engine, changes| {
                engine.emit(ScriptedChange::establish(7, true, false), changes);
            })
            .unwrap();

        // Reading fd 7 makes the engine open fd 8 and finish with fd 7.
        stack.engine_mut().on_drive(
            DriveTarget::Socket {
                fd: 7,
                event: SocketEvent::Read,
            },
            vec![
                ScriptedChange::establish(8, false, true),
                ScriptedChange::remove(7),
            ],
        );

        stack
            .dispatch(&mut reactor, Readiness::new(Token(7), SocketEvent::Read))
            .unwrap();

        assert_eq!(
            stack.engine().drives(),
            &[DriveTarget::Socket {
                fd: 7,
                event: SocketEvent::Read
            }]
        );
        assert!(!reactor.is_open(Token(7)));
        assert!(interest(&reactor, 8).is_some_and(|i| i.write && i.error && !i.read));
        assert_eq!(stack.live_sockets(), 1);
    }

    #[test]
    fn test_stale_readiness_is_dropped() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(3, true, false))
            .unwrap();

        // Closed socket and withdrawn write interest.
        stack
            .dispatch(&mut reactor, Readiness::new(Token(40), SocketEvent::Read))
            .unwrap();
        stack
            .dispatch(&mut reactor, Readiness::new(Token(3), SocketEvent::Write))
            .unwrap();

        assert!(stack.engine().drives().is_empty());
    }

    #[test]
    fn test_error_readiness_drives_engine() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(3, false, false))
            .unwrap();

        stack.on_error(&mut reactor, 3).unwrap();
        assert_eq!(
            stack.engine().drives(),
            &[DriveTarget::Socket {
                fd: 3,
                event: SocketEvent::Error
            }]
        );
    }

    #[test]
    fn test_engine_failure_still_applies_changes() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(3, true, false))
            .unwrap();
        stack.engine_mut().on_drive(
            DriveTarget::Socket {
                fd: 3,
                event: SocketEvent::Read,
            },
            vec![ScriptedChange::remove(3)],
        );
        stack.engine_mut().fail_next_drive("connection reset");

        let err = stack.on_readable(&mut reactor, 3).unwrap_err();
        assert!(matches!(err, TransferError::Engine { .. }));
        assert_eq!(stack.live_sockets(), 0);
        assert!(!reactor.is_open(Token(3)));
    }

    #[test]
    fn test_timer_fires_when_due() {
        let (mut stack, mut reactor) = stack();
        stack.engine_mut().set_timeout(Some(Duration::ZERO));
        stack.perform(&mut reactor, |_, _| ()).unwrap();

        let deadline = stack.timer_deadline().unwrap();
        assert!(stack.run_timers(&mut reactor, deadline).unwrap());
        assert_eq!(stack.engine().drives(), &[DriveTarget::Timeout]);

        stack.engine_mut().set_timeout(None);
        stack.perform(&mut reactor, |_, _| ()).unwrap();
        assert!(!stack.run_timers(&mut reactor, Instant::now()).unwrap());
    }

    #[test]
    fn test_quick_shutdown_removes_sockets() {
        let (mut stack, mut reactor) = stack();
        stack
            .perform(&mut reactor, |engine, changes| {
                engine.start_transfer(&[ScriptedChange::establish(10, true, false)], changes);
                engine.start_transfer(&[ScriptedChange::establish(11, false, true)], changes);
            })
            .unwrap();
        assert!(!stack.is_shutdown_completed());

        stack
            .begin_shutdown(&mut reactor, ShutdownMode::Normal)
            .unwrap();
        assert!(!stack.is_shutdown_completed());
        assert!(matches!(
            stack.perform(&mut reactor, |_, _| ()),
            Err(TransferError::ShuttingDown)
        ));

        stack.begin_shutdown(&mut reactor, ShutdownMode::Quick).unwrap();
        assert!(stack.is_shutdown_completed());
        assert_eq!(stack.live_sockets(), 0);
        assert_eq!(reactor.open_count(), 0);

        // Quick is sticky; later requests are ignored.
        stack
            .begin_shutdown(&mut reactor, ShutdownMode::Normal)
            .unwrap();
        assert_eq!(
            stack.engine().shutdowns(),
            &[ShutdownMode::Normal, ShutdownMode::Quick]
        );
    }

    #[test]
    fn test_cleanup_force_closes_leftover_sockets() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(14, true, true))
            .unwrap();
        stack.engine_mut().skip_cleanup_removals();

        let forced = stack.cleanup(&mut reactor);

        assert_eq!(forced, 1);
        assert_eq!(reactor.open_count(), 0);
        assert!(stack.engine().assigned_key(14).is_none());
    }

    #[test]
    fn test_cleanup_lets_engine_remove_first() {
        let (mut stack, mut reactor) = stack();
        stack
            .handle_interest_change(&mut reactor, InterestChange::establish(15, true, false))
            .unwrap();

        assert_eq!(stack.cleanup(&mut reactor), 0);
        assert_eq!(reactor.open_count(), 0);
    }
}
