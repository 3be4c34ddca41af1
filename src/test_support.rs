//! Scripted transport and recording observer for lifecycle tests.

use crate::error::Error;
use crate::handler::{ConnectionObserver, StateChange, TerminalFailure};
use crate::lifecycle::ConnectionState;
use crate::transport::{Frame, Session, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// What the next `open` call does
enum Plan {
    Refuse,
    /// Never completes; exercises the connect timeout
    Stall,
    Accept {
        frames: mpsc::UnboundedReceiver<Frame>,
        answer_pings: bool,
        close_hangs: bool,
    },
}

#[derive(Default)]
struct ScriptState {
    plans: Mutex<VecDeque<Plan>>,
    opens: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

/// Transport whose `open` outcomes are queued up front.
///
/// With an empty queue every `open` is refused. Clones share the script.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    state: Arc<ScriptState>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse(&self, times: usize) {
        let mut plans = self.state.plans.lock();
        plans.extend((0..times).map(|_| Plan::Refuse));
    }

    pub(crate) fn stall(&self) {
        self.state.plans.lock().push_back(Plan::Stall);
    }

    /// Queue a successful open. Frames sent on the returned channel arrive on
    /// the session; dropping it ends the stream.
    pub(crate) fn accept(&self) -> mpsc::UnboundedSender<Frame> {
        self.push_accept(true, false)
    }

    /// Like [`accept`](Self::accept), but the session never answers pings.
    pub(crate) fn accept_silent(&self) -> mpsc::UnboundedSender<Frame> {
        self.push_accept(false, false)
    }

    /// Like [`accept`](Self::accept), but `close` never completes, as with a
    /// peer that stopped reading.
    pub(crate) fn accept_unclosable(&self) -> mpsc::UnboundedSender<Frame> {
        self.push_accept(true, true)
    }

    fn push_accept(&self, answer_pings: bool, close_hangs: bool) -> mpsc::UnboundedSender<Frame> {
        let (tx, frames) = mpsc::unbounded_channel();
        self.state.plans.lock().push_back(Plan::Accept {
            frames,
            answer_pings,
            close_hangs,
        });
        tx
    }

    /// Number of `open` calls so far
    pub(crate) fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Sessions currently alive
    pub(crate) fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Most sessions ever alive at once
    pub(crate) fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    async fn open(&self, _url: &Url) -> Result<ScriptedSession, Error> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let plan = self.state.plans.lock().pop_front().unwrap_or(Plan::Refuse);

        match plan {
            Plan::Refuse => Err(Error::ConnectionFailed("connection refused".to_string())),
            Plan::Stall => std::future::pending().await,
            Plan::Accept {
                frames,
                answer_pings,
                close_hangs,
            } => {
                let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.state.max_live.fetch_max(live, Ordering::SeqCst);
                Ok(ScriptedSession {
                    frames,
                    answer_pings,
                    close_hangs,
                    pong_due: false,
                    state: self.state.clone(),
                })
            }
        }
    }
}

pub(crate) struct ScriptedSession {
    frames: mpsc::UnboundedReceiver<Frame>,
    answer_pings: bool,
    close_hangs: bool,
    pong_due: bool,
    state: Arc<ScriptState>,
}

impl Session for ScriptedSession {
    async fn recv(&mut self) -> Option<Result<Frame, Error>> {
        if self.pong_due {
            self.pong_due = false;
            return Some(Ok(Frame::Pong));
        }
        self.frames.recv().await.map(Ok)
    }

    async fn ping(&mut self) -> Result<(), Error> {
        self.pong_due = self.answer_pings;
        Ok(())
    }

    async fn close(&mut self) {
        if self.close_hangs {
            std::future::pending::<()>().await;
        }
        self.frames.close();
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Observer that records every notification
#[derive(Default)]
pub(crate) struct RecordingObserver {
    changes: Mutex<Vec<StateChange>>,
    failures: Mutex<Vec<TerminalFailure>>,
}

impl RecordingObserver {
    pub(crate) fn changes(&self) -> Vec<StateChange> {
        self.changes.lock().clone()
    }

    /// The `current` state of every recorded change, in order
    pub(crate) fn states(&self) -> Vec<ConnectionState> {
        self.changes.lock().iter().map(|c| c.current).collect()
    }

    pub(crate) fn terminal_failures(&self) -> Vec<TerminalFailure> {
        self.failures.lock().clone()
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_state_change(&self, change: &StateChange) {
        self.changes.lock().push(*change);
    }

    fn on_terminal_failure(&self, failure: &TerminalFailure) {
        self.failures.lock().push(failure.clone());
    }
}
