//! Reconnect pacing: exponential backoff between a floor and a ceiling

use crate::config::BackoffConfig;

/// Delay bookkeeping for connection attempts.
///
/// Each failure doubles the delay (capped at the ceiling) and schedules the
/// next attempt that far after the failure; a success drops back to the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    floor_ms: u64,
    ceiling_ms: u64,
    current_delay_ms: u64,
    next_attempt_at: u64,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let floor_ms = config.floor_ms.max(1);
        Self {
            floor_ms,
            ceiling_ms: config.ceiling_ms.max(floor_ms),
            current_delay_ms: floor_ms,
            next_attempt_at: 0,
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.current_delay_ms
    }

    pub fn next_attempt_at(&self) -> u64 {
        self.next_attempt_at
    }

    /// Whether an attempt is allowed at `now_ms`.
    pub fn ready(&self, now_ms: u64) -> bool {
        now_ms >= self.next_attempt_at
    }

    /// Record a failed attempt at `now_ms` and return the delay until the next.
    pub fn on_failure(&mut self, now_ms: u64) -> u64 {
        self.current_delay_ms = self
            .current_delay_ms
            .saturating_mul(2)
            .min(self.ceiling_ms);
        self.next_attempt_at = now_ms.saturating_add(self.current_delay_ms);
        self.current_delay_ms
    }

    pub fn on_success(&mut self) {
        self.current_delay_ms = self.floor_ms;
        self.next_attempt_at = 0;
    }

    /// Allow an attempt right away without touching the delay.
    pub fn retry_now(&mut self, now_ms: u64) {
        self.next_attempt_at = now_ms;
    }
}
