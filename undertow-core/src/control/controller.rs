//! Process-wide lifecycle controller.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{ControlError, LifecycleState, ShutdownMode, Subsystem};
use crate::config::UndertowConfig;
use crate::reactor::{Reactor, Readiness};
use crate::scheduler::{Scheduler, TaskId};
use crate::transfer::{InterestChanges, TransferEngine, TransferStack};

/// Tasks the controller schedules for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlTask {
    /// Grace period of a normal shutdown expired
    QuickShutdown,
}

/// Owns every daemon subsystem and sequences startup and shutdown.
///
/// Created before any subsystem exists and dropped only after all of them
/// are cleaned up. Dropping a controller that was never cleaned up runs
/// [`Control::cleanup_exception`].
pub struct Control<R: Reactor, E: TransferEngine> {
    config: UndertowConfig,
    state: LifecycleState,
    reactor: Option<R>,
    transfer: Option<TransferStack<E>>,
    subsystems: Vec<Box<dyn Subsystem>>,
    /// Prefix of `subsystems` that initialized successfully
    initialized: usize,
    /// Prefix of `subsystems` whose `initialize()` was entered
    started: usize,
    scheduler: Scheduler<ControlTask>,
    quick_shutdown_task: Option<TaskId>,
    began_normal: bool,
    began_quick: bool,
    tick: u64,
    shutdown_received: bool,
    shutdown_quick: bool,
    umask: u32,
    working_directory: PathBuf,
    ready: Vec<Readiness>,
}

impl<R: Reactor, E: TransferEngine> Control<R, E> {
    /// Creates the controller and applies process-wide settings.
    ///
    /// # Errors
    ///
    /// - `ControlError::WorkingDirectory` - Configured directory is unusable
    pub fn new(config: UndertowConfig) -> Result<Self, ControlError> {
        let umask = match config.process.umask {
            Some(mask) => {
                apply_umask(mask);
                mask
            }
            None => current_umask(),
        };

        let working_directory = match &config.process.working_directory {
            Some(path) => {
                std::env::set_current_dir(path).map_err(|source| {
                    ControlError::WorkingDirectory {
                        path: path.clone(),
                        source,
                    }
                })?;
                std::env::current_dir().map_err(|source| ControlError::WorkingDirectory {
                    path: path.clone(),
                    source,
                })?
            }
            None => std::env::current_dir().map_err(|source| ControlError::WorkingDirectory {
                path: PathBuf::from("."),
                source,
            })?,
        };

        let ready = Vec::with_capacity(config.reactor.max_events);

        tracing::debug!(
            umask = %format!("{umask:03o}"),
            working_directory = %working_directory.display(),
            "Controller constructed"
        );

        Ok(Self {
            config,
            state: LifecycleState::Constructed,
            reactor: None,
            transfer: None,
            subsystems: Vec::new(),
            initialized: 0,
            started: 0,
            scheduler: Scheduler::new(),
            quick_shutdown_task: None,
            began_normal: false,
            began_quick: false,
            tick: 0,
            shutdown_received: false,
            shutdown_quick: false,
            umask,
            working_directory,
            ready,
        })
    }

    /// Registers a subsystem. Subsystems initialize in registration order.
    ///
    /// # Errors
    ///
    /// - `ControlError::InvalidState` - Controller already initialized
    pub fn add_subsystem(&mut self, subsystem: Box<dyn Subsystem>) -> Result<(), ControlError> {
        if self.state != LifecycleState::Constructed {
            return Err(self.invalid_state("add subsystem"));
        }
        self.subsystems.push(subsystem);
        Ok(())
    }

    /// Takes ownership of the opened reactor and the transfer engine, then
    /// initializes the transfer stack and every registered subsystem.
    ///
    /// On error, whatever did initialize stays owned by the controller; the
    /// caller is expected to run [`Control::cleanup_exception`].
    ///
    /// # Errors
    ///
    /// - `ControlError::InvalidState` - Already initialized
    /// - `ControlError::Transfer` - Transfer stack failed to initialize
    /// - `ControlError::SubsystemFailed` - A subsystem failed to initialize
    pub fn initialize(&mut self, reactor: R, engine: E) -> Result<(), ControlError> {
        if self.state != LifecycleState::Constructed {
            return Err(self.invalid_state("initialize"));
        }

        let reactor = self.reactor.insert(reactor);
        let transfer = self
            .transfer
            .insert(TransferStack::new(engine, self.config.transfer.clone()));
        transfer.initialize(reactor)?;

        for subsystem in &mut self.subsystems {
            tracing::debug!(subsystem = subsystem.name(), "Initializing subsystem");
            self.started += 1;
            subsystem
                .initialize()
                .map_err(|source| ControlError::SubsystemFailed {
                    name: subsystem.name().to_string(),
                    source,
                })?;
            self.initialized += 1;
        }

        self.state = LifecycleState::Initialized;
        tracing::info!(subsystems = self.initialized, "Daemon initialized");
        Ok(())
    }

    /// Advances the tick counter and offers the tick to every subsystem.
    ///
    /// The first tick moves an initialized controller to running.
    pub fn inc_tick(&mut self) -> u64 {
        self.tick += 1;
        if self.state == LifecycleState::Initialized {
            self.state = LifecycleState::Running;
            tracing::info!("Daemon running");
        }

        let tick = self.tick;
        for subsystem in &mut self.subsystems[..self.initialized] {
            subsystem.on_tick(tick);
        }
        tick
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn receive_normal_shutdown(&mut self) {
        self.shutdown_received = true;
        self.state = self.state.with_request(ShutdownMode::Normal);
        tracing::info!(state = %self.state, "Normal shutdown received");
    }

    /// Requests a quick shutdown. Quick is sticky: later normal requests
    /// never clear it.
    pub fn receive_quick_shutdown(&mut self) {
        self.shutdown_received = true;
        self.shutdown_quick = true;
        self.state = self.state.with_request(ShutdownMode::Quick);

        if let Some(task) = self.quick_shutdown_task.take() {
            self.scheduler.cancel(task);
        }
        tracing::info!(state = %self.state, "Quick shutdown received");
    }

    pub fn is_shutdown_received(&self) -> bool {
        self.shutdown_received
    }

    pub fn is_shutdown_quick(&self) -> bool {
        self.shutdown_quick
    }

    /// True once [`Control::handle_shutdown`] has begun winding down.
    pub fn is_shutdown_started(&self) -> bool {
        self.began_normal || self.began_quick
    }

    /// True when the transfer stack and every initialized subsystem report
    /// no outstanding work.
    pub fn is_shutdown_completed(&self) -> bool {
        let transfer_done = self
            .transfer
            .as_ref()
            .is_none_or(TransferStack::is_shutdown_completed);

        transfer_done
            && self.subsystems[..self.initialized]
                .iter()
                .all(|subsystem| subsystem.is_shutdown_completed())
    }

    /// Progresses a received shutdown. See [`Control::handle_shutdown_at`].
    ///
    /// # Errors
    ///
    /// See [`Control::handle_shutdown_at`].
    pub fn handle_shutdown(&mut self) -> Result<(), ControlError> {
        self.handle_shutdown_at(Instant::now())
    }

    /// Begins the requested shutdown mode if it has not begun yet, and runs
    /// [`Control::cleanup`] once everything reports completion.
    ///
    /// Beginning a normal shutdown schedules escalation to quick after the
    /// configured grace period, measured from `now`.
    ///
    /// # Errors
    ///
    /// - `ControlError::InvalidState` - No shutdown was received, or the
    ///   controller was never initialized
    /// - `ControlError::SubsystemFailed` - Cleanup of a subsystem failed
    pub fn handle_shutdown_at(&mut self, now: Instant) -> Result<(), ControlError> {
        match self.state {
            LifecycleState::Cleaned => return Ok(()),
            LifecycleState::Constructed => return Err(self.invalid_state("handle shutdown")),
            _ if !self.shutdown_received => return Err(self.invalid_state("handle shutdown")),
            _ => {}
        }

        if self.shutdown_quick {
            if !self.began_quick {
                self.began_quick = true;
                self.begin_shutdown(ShutdownMode::Quick);
            }
            self.state = LifecycleState::ShutdownInProgress(ShutdownMode::Quick);
        } else {
            if !self.began_normal {
                self.began_normal = true;
                self.begin_shutdown(ShutdownMode::Normal);

                let delay = self.config.shutdown.quick_shutdown_delay;
                let task = self.scheduler.insert(now + delay, ControlTask::QuickShutdown);
                self.quick_shutdown_task = Some(task);
                tracing::debug!(?delay, "Quick shutdown scheduled");
            }
            self.state = LifecycleState::ShutdownInProgress(ShutdownMode::Normal);
        }

        if self.is_shutdown_completed() {
            self.cleanup()?;
        }
        Ok(())
    }

    /// Runs scheduled tasks due at `now`. Returns how many ran.
    pub fn run_scheduled(&mut self, now: Instant) -> usize {
        let due = self.scheduler.pop_due(now);
        let count = due.len();

        for (id, task) in due {
            match task {
                ControlTask::QuickShutdown => {
                    if self.quick_shutdown_task == Some(id) {
                        self.quick_shutdown_task = None;
                    }
                    tracing::warn!("Shutdown grace period expired, escalating to quick shutdown");
                    self.receive_quick_shutdown();
                }
            }
        }
        count
    }

    /// How long the next reactor wait may last.
    ///
    /// Bounded by the configured poll interval, the next scheduled task and
    /// the engine timer.
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        let deadlines = [
            self.scheduler.next_deadline(),
            self.transfer.as_ref().and_then(TransferStack::timer_deadline),
        ];

        deadlines
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(self.config.reactor.max_poll_interval, Duration::min)
    }

    /// Waits up to `timeout` for readiness and dispatches it to the transfer
    /// stack, then fires the engine timer if due. Returns the number of
    /// readiness events dispatched.
    ///
    /// Transfer errors are logged and do not stop the loop.
    ///
    /// # Errors
    ///
    /// - `ControlError::InvalidState` - No reactor is owned
    /// - `ControlError::Reactor` - The reactor wait failed
    pub fn process_events(&mut self, timeout: Duration) -> Result<usize, ControlError> {
        let state = self.state;
        let (Some(reactor), Some(transfer)) = (self.reactor.as_mut(), self.transfer.as_mut())
        else {
            return Err(ControlError::InvalidState {
                operation: "process events",
                state,
            });
        };

        self.ready.clear();
        reactor
            .poll(Some(timeout), &mut self.ready)
            .map_err(ControlError::Reactor)?;

        let count = self.ready.len();
        for readiness in self.ready.drain(..) {
            if let Err(e) = transfer.dispatch(reactor, readiness) {
                log_transfer_error(&e);
            }
        }

        if let Err(e) = transfer.run_timers(reactor, Instant::now()) {
            log_transfer_error(&e);
        }
        Ok(count)
    }

    /// Hands work to the transfer engine and applies the interest changes
    /// it queues.
    ///
    /// # Errors
    ///
    /// - `ControlError::InvalidState` - Not initialized
    /// - `ControlError::Transfer` - Shutting down, or a change failed
    pub fn perform<T>(
        &mut self,
        work: impl FnOnce(&mut E, &mut InterestChanges) -> T,
    ) -> Result<T, ControlError> {
        let state = self.state;
        let (Some(reactor), Some(transfer)) = (self.reactor.as_mut(), self.transfer.as_mut())
        else {
            return Err(ControlError::InvalidState {
                operation: "perform transfer work",
                state,
            });
        };

        Ok(transfer.perform(reactor, work)?)
    }

    /// Releases everything in reverse initialization order: subsystems,
    /// then the transfer stack and its sockets, then the reactor.
    ///
    /// Every component is released even if an earlier one fails; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// - `ControlError::SubsystemFailed` - A subsystem failed to clean up
    pub fn cleanup(&mut self) -> Result<(), ControlError> {
        if self.state == LifecycleState::Cleaned {
            return Ok(());
        }

        let mut first_error = None;
        while self.initialized > 0 {
            self.initialized -= 1;
            let Some(subsystem) = self.subsystems.get_mut(self.initialized) else {
                continue;
            };
            self.started = self.initialized;

            tracing::debug!(subsystem = subsystem.name(), "Cleaning up subsystem");
            if let Err(source) = subsystem.cleanup() {
                tracing::error!(subsystem = subsystem.name(), error = %source, "Subsystem cleanup failed");
                first_error.get_or_insert(ControlError::SubsystemFailed {
                    name: subsystem.name().to_string(),
                    source,
                });
            }
        }

        self.release_transfer_and_reactor();
        self.state = LifecycleState::Cleaned;
        tracing::info!(tick = self.tick, "Daemon cleaned up");

        first_error.map_or(Ok(()), Err)
    }

    /// Best-effort release after an unrecoverable failure.
    ///
    /// Releases every subsystem whose startup was entered, including one that
    /// failed part-way, then the transfer stack and reactor. Errors and panics from individual components are logged and
    /// swallowed.
    pub fn cleanup_exception(&mut self) {
        if self.state == LifecycleState::Cleaned {
            return;
        }
        tracing::warn!(
            state = %self.state,
            started = self.started,
            "Releasing subsystems after failure"
        );

        self.initialized = 0;
        while self.started > 0 {
            self.started -= 1;
            let Some(subsystem) = self.subsystems.get_mut(self.started) else {
                continue;
            };

            let name = subsystem.name().to_string();
            match panic::catch_unwind(AssertUnwindSafe(|| subsystem.cleanup())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(subsystem = %name, error = %e, "Subsystem cleanup failed");
                }
                Err(_) => tracing::error!(subsystem = %name, "Subsystem cleanup panicked"),
            }
        }

        if panic::catch_unwind(AssertUnwindSafe(|| self.release_transfer_and_reactor())).is_err()
        {
            tracing::error!("Transfer stack teardown panicked");
        }

        self.scheduler = Scheduler::new();
        self.quick_shutdown_task = None;
        self.state = LifecycleState::Cleaned;
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &UndertowConfig {
        &self.config
    }

    pub fn reactor(&self) -> Option<&R> {
        self.reactor.as_ref()
    }

    pub fn reactor_mut(&mut self) -> Option<&mut R> {
        self.reactor.as_mut()
    }

    pub fn transfer(&self) -> Option<&TransferStack<E>> {
        self.transfer.as_ref()
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Changes the process working directory.
    ///
    /// # Errors
    ///
    /// - `ControlError::WorkingDirectory` - Directory is unusable
    pub fn set_working_directory(&mut self, path: impl AsRef<Path>) -> Result<(), ControlError> {
        let path = path.as_ref();
        std::env::set_current_dir(path).map_err(|source| ControlError::WorkingDirectory {
            path: path.to_path_buf(),
            source,
        })?;

        self.working_directory =
            std::env::current_dir().map_err(|source| ControlError::WorkingDirectory {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            working_directory = %self.working_directory.display(),
            "Working directory changed"
        );
        Ok(())
    }

    pub fn umask(&self) -> u32 {
        self.umask
    }

    /// Applies a new process file mode creation mask.
    pub fn set_umask(&mut self, mask: u32) {
        apply_umask(mask);
        self.umask = mask;
    }

    fn begin_shutdown(&mut self, mode: ShutdownMode) {
        tracing::info!(%mode, tick = self.tick, "Beginning shutdown");

        if let (Some(reactor), Some(transfer)) = (self.reactor.as_mut(), self.transfer.as_mut()) {
            if let Err(e) = transfer.begin_shutdown(reactor, mode) {
                tracing::warn!(%mode, error = %e, "Transfer stack shutdown incomplete");
            }
        }

        for subsystem in &mut self.subsystems[..self.initialized] {
            subsystem.begin_shutdown(mode);
        }
    }

    fn release_transfer_and_reactor(&mut self) {
        if let Some(mut transfer) = self.transfer.take() {
            match self.reactor.as_mut() {
                Some(reactor) => {
                    transfer.cleanup(reactor);
                }
                None => tracing::error!("Transfer stack outlived its reactor"),
            }
        }

        if let Some(mut reactor) = self.reactor.take() {
            reactor.release();
            tracing::debug!("Reactor released");
        }
    }

    fn invalid_state(&self, operation: &'static str) -> ControlError {
        ControlError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl<R: Reactor, E: TransferEngine> Drop for Control<R, E> {
    fn drop(&mut self) {
        if self.state.is_live() || self.reactor.is_some() {
            tracing::warn!(state = %self.state, "Controller dropped without cleanup");
            self.cleanup_exception();
        }
    }
}

fn log_transfer_error(error: &crate::transfer::TransferError) {
    if error.is_resource_exhaustion() {
        tracing::warn!(error = %error, "Transfer socket refused: resources exhausted");
    } else {
        tracing::warn!(error = %error, "Transfer processing failed");
    }
}

/// Reads the process umask without clearing it.
///
/// umask(2) can only be queried by setting it, which briefly clears the mask
/// for every thread. It is used only when `/proc/self/status` lacks the field.
fn current_umask() -> u32 {
    if let Some(mask) = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| status_umask(&status))
    {
        return mask;
    }

    // SAFETY: umask cannot fail; the previous mask is restored immediately.
    let mask = unsafe { libc::umask(0) };
    unsafe {
        libc::umask(mask);
    }
    u32::from(mask)
}

/// Extracts the `Umask:` line of a `/proc/<pid>/status` listing.
fn status_umask(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Umask:"))
        .and_then(|value| crate::config::parse_umask(value).ok())
}

fn apply_umask(mask: u32) {
    // SAFETY: umask cannot fail and only touches process state.
    unsafe {
        libc::umask((mask & 0o777) as libc::mode_t);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::control::test_mocks::MockSubsystem;
    use crate::reactor::{ReactorCall, RecordingReactor, SocketEvent, Token};
    use crate::transfer::{DriveTarget, IdleEngine, ScriptedChange, ScriptedEngine};

    type Log = Rc<RefCell<Vec<String>>>;

    fn control_with(
        names: &[&str],
        log: &Log,
    ) -> Control<RecordingReactor, ScriptedEngine> {
        let mut control = Control::new(UndertowConfig::for_testing()).unwrap();
        for name in names {
            control
                .add_subsystem(Box::new(MockSubsystem::new(name, Rc::clone(log))))
                .unwrap();
        }
        control
    }

    #[test]
    fn test_initialize_runs_subsystems_in_order() {
        let log = Log::default();
        let mut control = control_with(&["storage", "peers", "rpc"], &log);

        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();

        assert_eq!(control.state(), LifecycleState::Initialized);
        assert_eq!(
            *log.borrow(),
            vec!["storage:initialize", "peers:initialize", "rpc:initialize"]
        );

        control.inc_tick();
        assert_eq!(control.state(), LifecycleState::Running);
        assert_eq!(control.tick(), 1);
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let mut control = control_with(&[], &Log::default());
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();

        let err = control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidState { .. }));
        assert!(
            control
                .add_subsystem(Box::new(MockSubsystem::new("late", Log::default())))
                .is_err()
        );
    }

    #[test]
    fn test_ticks_reach_subsystems() {
        let log = Log::default();
        let mut control = control_with(&["peers"], &log);
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        log.borrow_mut().clear();

        control.inc_tick();
        control.inc_tick();

        assert_eq!(*log.borrow(), vec!["peers:tick:1", "peers:tick:2"]);
    }

    #[test]
    fn test_quick_flag_is_sticky() {
        let mut control = control_with(&[], &Log::default());
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();

        control.receive_quick_shutdown();
        control.receive_normal_shutdown();
        assert!(control.is_shutdown_quick());
        assert_eq!(
            control.state(),
            LifecycleState::ShutdownRequested(ShutdownMode::Quick)
        );

        let mut control = control_with(&[], &Log::default());
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        control.receive_normal_shutdown();
        assert!(!control.is_shutdown_quick());
        control.receive_quick_shutdown();
        assert!(control.is_shutdown_quick());
        assert!(control.is_shutdown_received());
    }

    #[test]
    fn test_handle_shutdown_without_request_is_rejected() {
        let mut control = control_with(&[], &Log::default());
        assert!(control.handle_shutdown().is_err());

        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        assert!(matches!(
            control.handle_shutdown(),
            Err(ControlError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cleanup_waits_for_every_subsystem() {
        let log = Log::default();
        let mut control = Control::<RecordingReactor, ScriptedEngine>::new(
            UndertowConfig::for_testing(),
        )
        .unwrap();
        let peers = MockSubsystem::new("peers", Rc::clone(&log)).with_pending_work();
        let storage = MockSubsystem::new("storage", Rc::clone(&log)).with_pending_work();
        let peers_done = peers.completion();
        let storage_done = storage.completion();
        control.add_subsystem(Box::new(peers)).unwrap();
        control.add_subsystem(Box::new(storage)).unwrap();
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();

        control.receive_normal_shutdown();
        control.handle_shutdown().unwrap();
        assert!(control.is_shutdown_started());
        assert_eq!(
            control.state(),
            LifecycleState::ShutdownInProgress(ShutdownMode::Normal)
        );

        peers_done.set(true);
        control.handle_shutdown().unwrap();
        assert!(!control.is_shutdown_completed());
        assert_ne!(control.state(), LifecycleState::Cleaned);
        assert!(!log.borrow().iter().any(|entry| entry.ends_with(":cleanup")));

        storage_done.set(true);
        control.handle_shutdown().unwrap();
        assert_eq!(control.state(), LifecycleState::Cleaned);
    }

    #[test]
    fn test_cleanup_runs_in_reverse_order_before_reactor_release() {
        let log = Log::default();
        let mut control = control_with(&["storage", "peers", "rpc"], &log);
        let reactor = RecordingReactor::new();
        let journal = reactor.journal();
        control.initialize(reactor, ScriptedEngine::new()).unwrap();
        control
            .perform(|engine, changes| {
                engine.emit(ScriptedChange::establish(7, true, false), changes);
            })
            .unwrap();
        log.borrow_mut().clear();

        control.cleanup().unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["rpc:cleanup", "peers:cleanup", "storage:cleanup"]
        );
        let closed = journal.position(ReactorCall::Closed(Token(7))).unwrap();
        let released = journal.position(ReactorCall::Released).unwrap();
        assert!(closed < released);
        assert!(control.reactor().is_none());
        assert!(control.transfer().is_none());
    }

    #[test]
    fn test_normal_shutdown_escalates_after_grace_period() {
        let mut config = UndertowConfig::for_testing();
        config.shutdown.quick_shutdown_delay = Duration::from_secs(5);
        let mut control =
            Control::<RecordingReactor, ScriptedEngine>::new(config).unwrap();
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        control
            .perform(|engine, changes| {
                engine.start_transfer(&[ScriptedChange::establish(9, true, true)], changes);
            })
            .unwrap();

        let start = Instant::now();
        control.receive_normal_shutdown();
        control.handle_shutdown_at(start).unwrap();
        assert!(!control.is_shutdown_quick());
        assert_eq!(control.poll_timeout(start), Duration::from_millis(10));

        assert_eq!(control.run_scheduled(start + Duration::from_secs(4)), 0);
        assert!(!control.is_shutdown_quick());

        assert_eq!(control.run_scheduled(start + Duration::from_secs(5)), 1);
        assert!(control.is_shutdown_quick());

        control
            .handle_shutdown_at(start + Duration::from_secs(5))
            .unwrap();
        assert_eq!(control.state(), LifecycleState::Cleaned);
    }

    #[test]
    fn test_quick_shutdown_cancels_escalation() {
        let mut control = control_with(&[], &Log::default());
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        control
            .perform(|engine, _| engine.set_active_transfers(1))
            .unwrap();

        let now = Instant::now();
        control.receive_normal_shutdown();
        control.handle_shutdown_at(now).unwrap();
        control.receive_quick_shutdown();

        assert_eq!(control.run_scheduled(now + Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_process_events_dispatches_readiness() {
        let mut control = control_with(&[], &Log::default());
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        control
            .perform(|engine, changes| {
                engine.emit(ScriptedChange::establish(5, true, false), changes);
            })
            .unwrap();

        // fd 6 was never established; its readiness is stale.
        control.reactor_mut().unwrap().script_batch(vec![
            Readiness::new(Token(5), SocketEvent::Read),
            Readiness::new(Token(6), SocketEvent::Read),
        ]);
        let count = control.process_events(Duration::ZERO).unwrap();

        assert_eq!(count, 2);
        let drives = control.transfer().map(|t| t.engine().drives().to_vec());
        assert_eq!(
            drives,
            Some(vec![DriveTarget::Socket {
                fd: 5,
                event: SocketEvent::Read
            }])
        );
    }

    #[test]
    fn test_failed_initialize_is_released_by_cleanup_exception() {
        let log = Log::default();
        let mut control = Control::<RecordingReactor, IdleEngine>::new(
            UndertowConfig::for_testing(),
        )
        .unwrap();
        control
            .add_subsystem(Box::new(MockSubsystem::new("storage", Rc::clone(&log))))
            .unwrap();
        control
            .add_subsystem(Box::new(
                MockSubsystem::new("peers", Rc::clone(&log)).failing_initialize(),
            ))
            .unwrap();
        control
            .add_subsystem(Box::new(MockSubsystem::new("rpc", Rc::clone(&log))))
            .unwrap();
        let reactor = RecordingReactor::new();
        let journal = reactor.journal();

        let err = control.initialize(reactor, IdleEngine).unwrap_err();
        assert!(matches!(err, ControlError::SubsystemFailed { ref name, .. } if name == "peers"));

        control.cleanup_exception();

        assert_eq!(
            *log.borrow(),
            vec![
                "storage:initialize",
                "peers:initialize",
                "peers:cleanup",
                "storage:cleanup"
            ]
        );
        assert_eq!(journal.calls().last(), Some(&ReactorCall::Released));
        assert_eq!(control.state(), LifecycleState::Cleaned);
    }

    #[test]
    fn test_cleanup_exception_survives_panics_and_errors() {
        let log = Log::default();
        let mut control = control_with(&[], &log);
        control
            .add_subsystem(Box::new(MockSubsystem::new("storage", Rc::clone(&log))))
            .unwrap();
        control
            .add_subsystem(Box::new(
                MockSubsystem::new("peers", Rc::clone(&log)).panicking_cleanup(),
            ))
            .unwrap();
        control
            .add_subsystem(Box::new(
                MockSubsystem::new("rpc", Rc::clone(&log)).failing_cleanup(),
            ))
            .unwrap();
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();
        log.borrow_mut().clear();

        control.cleanup_exception();

        assert_eq!(
            *log.borrow(),
            vec!["rpc:cleanup", "peers:cleanup", "storage:cleanup"]
        );
        assert_eq!(control.state(), LifecycleState::Cleaned);
    }

    #[test]
    fn test_cleanup_reports_first_failure_and_releases_everything() {
        let log = Log::default();
        let mut control = control_with(&["storage"], &log);
        control
            .add_subsystem(Box::new(
                MockSubsystem::new("rpc", Rc::clone(&log)).failing_cleanup(),
            ))
            .unwrap();
        let reactor = RecordingReactor::new();
        let journal = reactor.journal();
        control.initialize(reactor, ScriptedEngine::new()).unwrap();

        let err = control.cleanup().unwrap_err();

        assert!(matches!(err, ControlError::SubsystemFailed { ref name, .. } if name == "rpc"));
        assert!(log.borrow().contains(&"storage:cleanup".to_string()));
        assert_eq!(journal.calls().last(), Some(&ReactorCall::Released));
    }

    #[test]
    fn test_drop_without_cleanup_releases_reactor() {
        let reactor = RecordingReactor::new();
        let journal = reactor.journal();
        {
            let mut control = control_with(&[], &Log::default());
            control.initialize(reactor, ScriptedEngine::new()).unwrap();
        }
        assert_eq!(journal.calls().last(), Some(&ReactorCall::Released));
    }

    #[test]
    fn test_poll_timeout_respects_engine_timer() {
        let mut control = control_with(&[], &Log::default());
        control
            .initialize(RecordingReactor::new(), ScriptedEngine::new())
            .unwrap();

        let now = Instant::now();
        assert_eq!(control.poll_timeout(now), Duration::from_millis(10));

        control
            .perform(|engine, _| engine.set_timeout(Some(Duration::ZERO)))
            .unwrap();
        assert_eq!(
            control.poll_timeout(Instant::now() + Duration::from_millis(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_status_umask_parsing() {
        let status = "Name:\tundertow\nUmask:\t0027\nState:\tR (running)\n";
        assert_eq!(status_umask(status), Some(0o027));
        assert_eq!(status_umask("Name:\tundertow\nState:\tS\n"), None);
        assert_eq!(status_umask("Umask:\tgarbage\n"), None);
    }

    #[test]
    fn test_umask_round_trip() {
        let mut control = control_with(&[], &Log::default());
        let original = control.umask();

        control.set_umask(0o077);
        assert_eq!(control.umask(), 0o077);

        control.set_umask(original);
        assert_eq!(control.umask(), original);
    }
}
