//! Mock subsystem for testing the lifecycle controller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{ShutdownMode, Subsystem, SubsystemError};

/// Subsystem that records every lifecycle call into a shared log.
///
/// Entries look like `"peers:initialize"`, `"peers:tick:3"` or
/// `"peers:begin_shutdown:quick"`, so one log can show ordering across
/// several subsystems.
#[derive(Debug)]
pub struct MockSubsystem {
    name: String,
    log: Rc<RefCell<Vec<String>>>,
    completed: Rc<Cell<bool>>,
    fail_initialize: bool,
    fail_cleanup: bool,
    panic_on_cleanup: bool,
    complete_on_quick: bool,
}

impl MockSubsystem {
    /// Creates a subsystem that succeeds at everything and has no pending work.
    pub fn new(name: &str, log: Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
            completed: Rc::new(Cell::new(true)),
            fail_initialize: false,
            fail_cleanup: false,
            panic_on_cleanup: false,
            complete_on_quick: false,
        }
    }

    /// Reports outstanding work until the completion flag is set.
    pub fn with_pending_work(self) -> Self {
        self.completed.set(false);
        self
    }

    /// Drops pending work when a quick shutdown begins.
    pub fn completing_on_quick(mut self) -> Self {
        self.complete_on_quick = true;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn panicking_cleanup(mut self) -> Self {
        self.panic_on_cleanup = true;
        self
    }

    /// Shared completion flag, settable after the subsystem is handed over.
    pub fn completion(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.completed)
    }

    fn record(&self, entry: &str) {
        self.log.borrow_mut().push(format!("{}:{entry}", self.name));
    }
}

impl Subsystem for MockSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), SubsystemError> {
        self.record("initialize");
        if self.fail_initialize {
            return Err(SubsystemError::failed("mock initialize failure"));
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), SubsystemError> {
        self.record("cleanup");
        if self.panic_on_cleanup {
            panic!("mock cleanup panic in {}", self.name);
        }
        if self.fail_cleanup {
            return Err(SubsystemError::failed("mock cleanup failure"));
        }
        Ok(())
    }

    fn is_shutdown_completed(&self) -> bool {
        self.completed.get()
    }

    fn begin_shutdown(&mut self, mode: ShutdownMode) {
        self.record(&format!("begin_shutdown:{mode}"));
        if mode == ShutdownMode::Quick && self.complete_on_quick {
            self.completed.set(true);
        }
    }

    fn on_tick(&mut self, tick: u64) {
        self.record(&format!("tick:{tick}"));
    }
}
