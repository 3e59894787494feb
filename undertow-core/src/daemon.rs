//! Daemon event loop.
//!
//! One iteration picks up termination signals, runs due scheduled tasks,
//! progresses a received shutdown, advances the tick and then waits on the
//! reactor and dispatches whatever became ready.

use std::time::Instant;

use crate::config::UndertowConfig;
use crate::control::{
    Control, ControlError, LifecycleState, ShutdownMode, ShutdownSignals, Subsystem,
};
use crate::reactor::{MioReactor, Reactor};
use crate::transfer::{IdleEngine, TransferEngine};

/// Runs the event loop of an initialized controller until it is cleaned up.
///
/// # Errors
///
/// - `ControlError::Reactor` - The reactor wait failed
/// - `ControlError::SubsystemFailed` - Cleanup of a subsystem failed
/// - `ControlError::InvalidState` - The controller was not initialized
pub fn run_event_loop<R, E>(
    control: &mut Control<R, E>,
    signals: &ShutdownSignals,
) -> Result<(), ControlError>
where
    R: Reactor,
    E: TransferEngine,
{
    tracing::debug!(state = %control.state(), "Entering event loop");

    loop {
        match signals.take_request(control.is_shutdown_started()) {
            Some(ShutdownMode::Normal) => control.receive_normal_shutdown(),
            Some(ShutdownMode::Quick) => control.receive_quick_shutdown(),
            None => {}
        }

        let now = Instant::now();
        control.run_scheduled(now);

        if control.is_shutdown_received() {
            control.handle_shutdown_at(now)?;
            if control.state() == LifecycleState::Cleaned {
                tracing::info!(tick = control.tick(), "Event loop finished");
                return Ok(());
            }
        }

        let tick = control.inc_tick();
        let timeout = control.poll_timeout(Instant::now());
        let dispatched = control.process_events(timeout)?;
        tracing::trace!(tick, dispatched, ?timeout, "Event loop iteration");
    }
}

/// Initializes `control` and runs it to completion.
///
/// Any failure, during initialization or in the loop, releases whatever was
/// initialized through [`Control::cleanup_exception`] before returning.
///
/// # Errors
///
/// See [`Control::initialize`] and [`run_event_loop`].
pub fn run<R, E>(
    control: &mut Control<R, E>,
    reactor: R,
    engine: E,
    signals: &ShutdownSignals,
) -> Result<(), ControlError>
where
    R: Reactor,
    E: TransferEngine,
{
    let result = control
        .initialize(reactor, engine)
        .and_then(|()| run_event_loop(control, signals));

    if let Err(e) = &result {
        tracing::error!(error = %e, state = %control.state(), "Daemon failed, releasing subsystems");
        control.cleanup_exception();
    }
    result
}

/// Runs the production daemon: mio reactor, no transfer backend, and
/// SIGINT/SIGTERM driving shutdown.
///
/// # Errors
///
/// - `UndertowError::Control` - Startup, event loop or cleanup failed
/// - `UndertowError::Io` - The reactor could not be created
pub fn run_daemon(
    config: UndertowConfig,
    subsystems: Vec<Box<dyn Subsystem>>,
) -> crate::Result<()> {
    let reactor = MioReactor::new(&config.reactor)?;
    let signals = ShutdownSignals::install()?;

    let mut control = Control::<MioReactor, IdleEngine>::new(config)?;
    for subsystem in subsystems {
        control.add_subsystem(subsystem)?;
    }

    tracing::info!(
        working_directory = %control.working_directory().display(),
        umask = %format!("{:03o}", control.umask()),
        "Starting undertow daemon"
    );
    run(&mut control, reactor, IdleEngine, &signals)?;
    Ok(())
}
