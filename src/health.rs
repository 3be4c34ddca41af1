use crate::config::HealthConfig;
use tokio::time::{Duration, Instant};

/// Where the keepalive exchange stands
#[derive(Debug, Clone, Copy)]
enum Keepalive {
    /// Nothing sent yet on this connection
    Fresh,
    /// Last ping answered (or timed out); next one due `ping_interval` after it
    Idle { last_ping: Instant },
    /// Ping sent, pong outstanding
    Awaiting { sent_at: Instant },
}

/// Liveness bookkeeping for one open session.
///
/// The connection task asks [`next_deadline`](Self::next_deadline) how long to
/// sleep, then calls [`poll`](Self::poll) on wakeup.
#[derive(Debug)]
pub(crate) struct HealthMonitor {
    config: HealthConfig,
    keepalive: Keepalive,
    last_data: Instant,
    missed_pongs: u32,
}

/// What the connection task should do after a health wakeup
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthAction {
    /// Nothing due yet
    Wait,
    /// Send a ping now
    Ping,
    /// A pong is overdue but the threshold is not reached
    MissedPong { missed: u32 },
    /// Too many missed pongs in a row
    Unresponsive { missed: u32 },
    /// No data frame within `data_timeout`
    Silent,
}

impl HealthMonitor {
    pub(crate) fn new(config: HealthConfig) -> Self {
        Self {
            config,
            keepalive: Keepalive::Fresh,
            last_data: Instant::now(),
            missed_pongs: 0,
        }
    }

    pub(crate) fn ping_sent(&mut self) {
        self.keepalive = Keepalive::Awaiting {
            sent_at: Instant::now(),
        };
    }

    pub(crate) fn pong_received(&mut self) {
        if let Keepalive::Awaiting { sent_at } = self.keepalive {
            self.keepalive = Keepalive::Idle { last_ping: sent_at };
        }
        self.missed_pongs = 0;
    }

    pub(crate) fn data_received(&mut self) {
        self.last_data = Instant::now();
    }

    /// Decide what is due now. Records a missed pong as a side effect, so call
    /// once per wakeup.
    pub(crate) fn poll(&mut self) -> HealthAction {
        if let Keepalive::Awaiting { sent_at } = self.keepalive {
            if sent_at.elapsed() >= self.config.pong_timeout {
                self.missed_pongs += 1;
                self.keepalive = Keepalive::Idle { last_ping: sent_at };
                return if self.missed_pongs >= self.config.failure_threshold {
                    HealthAction::Unresponsive {
                        missed: self.missed_pongs,
                    }
                } else {
                    HealthAction::MissedPong {
                        missed: self.missed_pongs,
                    }
                };
            }
        }

        if self
            .config
            .data_timeout
            .is_some_and(|limit| self.last_data.elapsed() >= limit)
        {
            return HealthAction::Silent;
        }

        match self.keepalive {
            Keepalive::Fresh => HealthAction::Ping,
            Keepalive::Idle { last_ping } if last_ping.elapsed() >= self.config.ping_interval => {
                HealthAction::Ping
            }
            Keepalive::Idle { .. } | Keepalive::Awaiting { .. } => HealthAction::Wait,
        }
    }

    /// How long until [`poll`](Self::poll) may return something other than `Wait`
    pub(crate) fn next_deadline(&self) -> Duration {
        let keepalive = match self.keepalive {
            Keepalive::Fresh => Duration::ZERO,
            Keepalive::Idle { last_ping } => {
                self.config.ping_interval.saturating_sub(last_ping.elapsed())
            }
            Keepalive::Awaiting { sent_at } => {
                self.config.pong_timeout.saturating_sub(sent_at.elapsed())
            }
        };

        match self.config.data_timeout {
            Some(limit) => keepalive.min(limit.saturating_sub(self.last_data.elapsed())),
            None => keepalive,
        }
    }
}
