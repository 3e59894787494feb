//! Lifecycle states of the daemon controller.

use std::fmt;

use serde::Serialize;

/// How aggressively the daemon winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Let in-flight work finish within the grace period
    Normal,
    /// Abort in-flight work and release everything
    Quick,
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownMode::Normal => write!(f, "normal"),
            ShutdownMode::Quick => write!(f, "quick"),
        }
    }
}

/// Where the controller is in its lifetime.
///
/// `ShutdownRequested` holds a mode that has been asked for but not yet
/// begun; `ShutdownInProgress` holds the mode most recently begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Constructed,
    Initialized,
    Running,
    ShutdownRequested(ShutdownMode),
    ShutdownInProgress(ShutdownMode),
    Cleaned,
}

impl LifecycleState {
    /// State after a shutdown request of `mode` arrives.
    ///
    /// Quick supersedes normal and is never downgraded. Requests before
    /// initialization or after cleanup leave the state alone.
    pub fn with_request(self, mode: ShutdownMode) -> Self {
        use LifecycleState::*;

        match (self, mode) {
            (Initialized | Running, mode) => ShutdownRequested(mode),
            (ShutdownRequested(ShutdownMode::Normal), ShutdownMode::Quick)
            | (ShutdownInProgress(ShutdownMode::Normal), ShutdownMode::Quick) => {
                ShutdownRequested(ShutdownMode::Quick)
            }
            (state, _) => state,
        }
    }

    /// True between initialization and cleanup.
    pub fn is_live(&self) -> bool {
        !matches!(self, LifecycleState::Constructed | LifecycleState::Cleaned)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Constructed => write!(f, "constructed"),
            LifecycleState::Initialized => write!(f, "initialized"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::ShutdownRequested(mode) => write!(f, "{mode} shutdown requested"),
            LifecycleState::ShutdownInProgress(mode) => write!(f, "{mode} shutdown in progress"),
            LifecycleState::Cleaned => write!(f, "cleaned"),
        }
    }
}
