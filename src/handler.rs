use crate::error::ErrorKind;
use crate::event::Event;
use crate::lifecycle::ConnectionState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Error returned by a failing event handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a single handler invocation
pub type HandlerResult = Result<(), HandlerError>;

/// Callback invoked with every event of the kind it was registered for.
///
/// Handlers run on the connection task, in registration order. A handler that
/// returns `Err` or panics is logged and skipped; the remaining handlers for the
/// same event still run.
pub type EventHandler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync + 'static>;

/// A lifecycle transition, as delivered to [`ConnectionObserver::on_state_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition
    pub previous: ConnectionState,
    /// State after the transition
    pub current: ConnectionState,
    /// Consecutive failed attempts after the transition (0 once connected)
    pub attempt: u32,
}

/// The one-time notification that automatic recovery has given up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFailure {
    /// Consecutive failed attempts, including the last one
    pub attempts: u32,
    /// Kind of the last transport error
    pub kind: ErrorKind,
    /// Message of the last transport error
    pub last_error: String,
}

/// Trait that UI-side code implements to follow the connection lifecycle.
///
/// Both methods default to no-ops. They are called outside of any internal
/// lock, so an observer may call back into the manager (e.g. `connect()` from
/// a "retry" button wired to `on_terminal_failure`).
///
/// # Example
///
/// ```ignore
/// struct Banner;
///
/// impl ConnectionObserver for Banner {
///     fn on_terminal_failure(&self, failure: &TerminalFailure) {
///         show_banner(format!("Live updates stopped: {}", failure.last_error));
///     }
/// }
/// ```
pub trait ConnectionObserver: Send + Sync + 'static {
    /// Called after every lifecycle transition.
    fn on_state_change(&self, _change: &StateChange) {}

    /// Called exactly once each time the connection gives up and enters
    /// [`ConnectionState::Failed`].
    fn on_terminal_failure(&self, _failure: &TerminalFailure) {}
}

/// Why a guarded callback did not complete
#[derive(Debug)]
pub(crate) enum CallbackFailure {
    Failed(HandlerError),
    Panicked(String),
}

impl std::fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackFailure::Failed(e) => write!(f, "{}", e),
            CallbackFailure::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

/// Run a user callback, converting a panic into a [`CallbackFailure`].
pub(crate) fn call_guarded(f: impl FnOnce() -> HandlerResult) -> Result<(), CallbackFailure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CallbackFailure::Failed(e)),
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            Err(CallbackFailure::Panicked(panic_msg))
        }
    }
}
