//! Connection lifecycle state machine.
//!
//! ```text
//! Disconnected --connect()--> Connecting
//! Connecting   --open ok----> Connected
//! Connecting   --open err---> Reconnecting | Failed
//! Connected    --close/err--> Reconnecting | Failed
//! Reconnecting --timer------> Connecting
//! any          --disconnect()--> Disconnected
//! ```
//!
//! Every `connect()` starts a new *generation*. Transitions requested by a
//! connection task carry the generation it was started with and are ignored
//! once `disconnect()` (or a later `connect()`) has moved the generation on, so
//! a timer that fires after an explicit disconnect can never reopen the stream.

use crate::error::Error;
use crate::handler::{call_guarded, ConnectionObserver, StateChange, TerminalFailure};
use crate::metrics::Metrics;
use crate::reconnect::ReconnectPolicy;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the event stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    #[default]
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, frames flowing
    Connected,
    /// Waiting for the reconnect timer
    Reconnecting,
    /// Gave up after exceeding the retry ceiling
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of reporting a transport failure
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FailureAction {
    /// The reporting task belongs to an older generation; it must exit.
    Stale,
    /// Sleep for `delay`, then call [`Lifecycle::retry`].
    Retry { delay: Duration, change: StateChange },
    /// Ceiling exceeded; the task must exit.
    GiveUp {
        change: StateChange,
        failure: TerminalFailure,
    },
}

/// Pure lifecycle bookkeeping: state, consecutive failures, generation.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: ConnectionState,
    attempt: u32,
    generation: u64,
}

impl Lifecycle {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    fn change(&mut self, to: ConnectionState) -> StateChange {
        let previous = std::mem::replace(&mut self.state, to);
        StateChange {
            previous,
            current: to,
            attempt: self.attempt,
        }
    }

    /// `connect()`: start a new generation from Disconnected or Failed.
    pub(crate) fn begin(&mut self) -> Option<(u64, StateChange)> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.generation += 1;
                self.attempt = 0;
                Some((self.generation, self.change(ConnectionState::Connecting)))
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => None,
        }
    }

    /// `disconnect()`: invalidate the running generation.
    pub(crate) fn end(&mut self) -> Option<StateChange> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.generation += 1;
        self.attempt = 0;
        Some(self.change(ConnectionState::Disconnected))
    }

    /// Transport opened.
    pub(crate) fn opened(&mut self, generation: u64) -> Option<StateChange> {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            return None;
        }
        self.attempt = 0;
        Some(self.change(ConnectionState::Connected))
    }

    /// Transport failed to open, closed, or errored.
    pub(crate) fn failed(
        &mut self,
        generation: u64,
        policy: &ReconnectPolicy,
        error: &Error,
    ) -> FailureAction {
        if generation != self.generation
            || !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return FailureAction::Stale;
        }

        let delay = policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if policy.is_exhausted(self.attempt) {
            let failure = TerminalFailure {
                attempts: self.attempt,
                kind: error.kind(),
                last_error: error.to_string(),
            };
            FailureAction::GiveUp {
                change: self.change(ConnectionState::Failed),
                failure,
            }
        } else {
            FailureAction::Retry {
                delay,
                change: self.change(ConnectionState::Reconnecting),
            }
        }
    }

    /// Reconnect timer fired.
    pub(crate) fn retry(&mut self, generation: u64) -> Option<StateChange> {
        if generation != self.generation || self.state != ConnectionState::Reconnecting {
            return None;
        }
        Some(self.change(ConnectionState::Connecting))
    }
}

/// Observer notification waiting to be delivered
#[derive(Debug)]
enum Notice {
    Change(StateChange),
    Terminal(TerminalFailure),
}

/// Task bookkeeping guarded together with the lifecycle.
#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) lifecycle: Lifecycle,
    /// Signals the current connection task to close and exit
    pub(crate) shutdown: Option<oneshot::Sender<()>>,
    /// Most recently spawned connection task. It may still be closing its
    /// transport after `disconnect()`; the next task waits for it.
    pub(crate) task: Option<JoinHandle<()>>,
    /// Notices in transition order, not yet handed to the observer
    pending: VecDeque<Notice>,
    /// Some caller is currently delivering `pending`
    draining: bool,
}

/// Lifecycle state shared between the manager handle and its connection task.
///
/// All transitions go through one mutex that is never held across an `.await`
/// or a user callback. Watchers are updated under the lock; observer notices
/// are queued under it and delivered in the same order after it is released,
/// so an observer may call back into the manager.
pub(crate) struct Shared {
    pub(crate) inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    observer: RwLock<Option<Arc<dyn ConnectionObserver>>>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Shared {
    pub(crate) fn new(metrics: Arc<Metrics>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Mutex::new(Inner::default()),
            state_tx,
            observer: RwLock::new(None),
            metrics,
        }
    }

    pub(crate) fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Record a transition. Call while holding `inner`, then [`flush`](Self::flush).
    pub(crate) fn publish(&self, inner: &mut Inner, change: StateChange) {
        self.state_tx.send_replace(change.current);
        inner.pending.push_back(Notice::Change(change));
    }

    /// Deliver queued notices. Call without holding `inner`.
    ///
    /// Only one caller drains at a time; notices queued meanwhile (including
    /// from inside an observer) are picked up by that caller.
    pub(crate) fn flush(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.draining {
                return;
            }
            inner.draining = true;
        }

        loop {
            let notice = {
                let mut inner = self.inner.lock();
                match inner.pending.pop_front() {
                    Some(notice) => notice,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            self.deliver(&notice);
        }
    }

    fn deliver(&self, notice: &Notice) {
        let observer = self.observer.read().clone();
        match notice {
            Notice::Change(change) => {
                debug!(
                    "[WS-EVENTS] {} -> {} (attempt {})",
                    change.previous, change.current, change.attempt
                );
                if let Some(observer) = observer {
                    if let Err(e) = call_guarded(|| {
                        observer.on_state_change(change);
                        Ok(())
                    }) {
                        error!("[WS-EVENTS] Observer.on_state_change failed: {}", e);
                    }
                }
            }
            Notice::Terminal(failure) => match observer {
                Some(observer) => {
                    if let Err(e) = call_guarded(|| {
                        observer.on_terminal_failure(failure);
                        Ok(())
                    }) {
                        error!("[WS-EVENTS] Observer.on_terminal_failure failed: {}", e);
                    }
                }
                None => warn!("[WS-EVENTS] No observer installed for terminal failure"),
            },
        }
    }

    fn transition(&self, f: impl FnOnce(&mut Lifecycle) -> Option<StateChange>) -> bool {
        let applied = {
            let mut inner = self.inner.lock();
            match f(&mut inner.lifecycle) {
                Some(change) => {
                    self.publish(&mut inner, change);
                    true
                }
                None => false,
            }
        };
        self.flush();
        applied
    }

    /// Report an open transport. Returns `false` if the task is stale.
    pub(crate) fn opened(&self, generation: u64) -> bool {
        self.transition(|lc| lc.opened(generation))
    }

    /// Report that the reconnect timer fired. Returns `false` if the task is stale.
    pub(crate) fn retry(&self, generation: u64) -> bool {
        self.transition(|lc| lc.retry(generation))
    }

    /// Report a transport failure and decide what the task does next.
    ///
    /// Returns the delay before the next attempt, or `None` if the task must exit.
    pub(crate) fn failed(
        &self,
        generation: u64,
        policy: &ReconnectPolicy,
        error: &Error,
    ) -> Option<Duration> {
        let action = {
            let mut inner = self.inner.lock();
            let action = inner.lifecycle.failed(generation, policy, error);
            match &action {
                FailureAction::Stale => {}
                FailureAction::Retry { change, .. } => self.publish(&mut inner, *change),
                FailureAction::GiveUp { change, failure } => {
                    self.publish(&mut inner, *change);
                    inner.pending.push_back(Notice::Terminal(failure.clone()));
                    // Failed has no live task; only a fresh connect() starts another.
                    inner.shutdown = None;
                }
            }
            action
        };

        let delay = match action {
            FailureAction::Stale => None,
            FailureAction::Retry { delay, change } => {
                self.metrics.record_reconnect_attempt();
                info!(
                    "[WS-EVENTS] Connection lost: {} (retry {} in {:?})",
                    error, change.attempt, delay
                );
                Some(delay)
            }
            FailureAction::GiveUp { failure, .. } => {
                self.metrics.record_terminal_failure();
                error!(
                    "[WS-EVENTS] Giving up after {} consecutive failures: {}",
                    failure.attempts, failure.last_error
                );
                None
            }
        };
        self.flush();
        delay
    }
}
