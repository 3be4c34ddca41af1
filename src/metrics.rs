use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for observability
///
/// Counters for the connection and dispatch paths. Use `snapshot()` for a
/// point-in-time view of all of them, or the individual getters.
///
/// # Example
/// ```ignore
/// let metrics = manager.metrics();
///
/// println!("Connections: {}", metrics.connections());
/// println!("Frames dropped: {}", metrics.frames_dropped());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    connections_total: AtomicU64,
    reconnect_attempts_total: AtomicU64,
    frames_received_total: AtomicU64,
    frames_dropped_total: AtomicU64,
    events_dispatched_total: AtomicU64,
    handler_failures_total: AtomicU64,
    pings_sent_total: AtomicU64,
    pongs_received_total: AtomicU64,
    health_failures_total: AtomicU64,
    terminal_failures_total: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub reconnect_attempts_total: u64,
    pub frames_received_total: u64,
    pub frames_dropped_total: u64,
    pub events_dispatched_total: u64,
    pub handler_failures_total: u64,
    pub pings_sent_total: u64,
    pub pongs_received_total: u64,
    pub health_failures_total: u64,
    pub terminal_failures_total: u64,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Get total successful connections
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total scheduled reconnect attempts
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts_total.load(Ordering::Relaxed)
    }

    /// Get total data frames received
    pub fn frames_received(&self) -> u64 {
        self.frames_received_total.load(Ordering::Relaxed)
    }

    /// Get total frames dropped as undecodable
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped_total.load(Ordering::Relaxed)
    }

    /// Get total decoded events dispatched
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched_total.load(Ordering::Relaxed)
    }

    /// Get total handler invocations that failed or panicked
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures_total.load(Ordering::Relaxed)
    }

    /// Get total pings sent
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent_total.load(Ordering::Relaxed)
    }

    /// Get total pongs received
    pub fn pongs_received(&self) -> u64 {
        self.pongs_received_total.load(Ordering::Relaxed)
    }

    /// Get total health check failures
    pub fn health_failures(&self) -> u64 {
        self.health_failures_total.load(Ordering::Relaxed)
    }

    /// Get total times the connection gave up
    pub fn terminal_failures(&self) -> u64 {
        self.terminal_failures_total.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_attempt(&self) {
        self.reconnect_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_dropped(&self) {
        self.frames_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_dispatched(&self) {
        self.events_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ping(&self) {
        self.pings_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pong(&self) {
        self.pongs_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_failure(&self) {
        self.health_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_terminal_failure(&self) {
        self.terminal_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Acquire),
            reconnect_attempts_total: self.reconnect_attempts_total.load(Ordering::Acquire),
            frames_received_total: self.frames_received_total.load(Ordering::Acquire),
            frames_dropped_total: self.frames_dropped_total.load(Ordering::Acquire),
            events_dispatched_total: self.events_dispatched_total.load(Ordering::Acquire),
            handler_failures_total: self.handler_failures_total.load(Ordering::Acquire),
            pings_sent_total: self.pings_sent_total.load(Ordering::Acquire),
            pongs_received_total: self.pongs_received_total.load(Ordering::Acquire),
            health_failures_total: self.health_failures_total.load(Ordering::Acquire),
            terminal_failures_total: self.terminal_failures_total.load(Ordering::Acquire),
        }
    }
}
