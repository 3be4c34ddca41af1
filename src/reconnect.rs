use std::time::Duration;

/// Exponential reconnect schedule with an optional attempt ceiling.
///
/// `delay(n) = min(base_delay * 2^n, max_delay)`. The schedule is deterministic:
/// the same attempt count always yields the same delay, so it can be reasoned
/// about (and tested) without a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before retrying after `attempt` previous failures (0-indexed).
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`, including when
    /// `2^attempt` would overflow.
    pub fn delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Returns `true` once `attempts` consecutive failures exceed the ceiling.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts > max)
    }
}
