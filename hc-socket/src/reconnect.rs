//! Reconnection bookkeeping and backoff delay calculation.

use std::time::Duration;

use hc_core::config::ReconnectConfig;
use hc_core::constants::{RECONNECT_BACKOFF_FACTOR, RECONNECT_DELAY_CAP_MS};

/// Attempt counter plus the delay schedule for reconnect timers.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt_count: u32,
    max_attempts: u32,
    base_delay_ms: u64,
    exponential: bool,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt_count: 0,
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            exponential: config.exponential_backoff,
        }
    }

    /// Delay before attempt number `attempt` (zero-based).
    ///
    /// Sequence with a 1s base: 1000, 1500, 2250, 3375, 5062 ms...,
    /// rounded down and capped at 30s.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = RECONNECT_DELAY_CAP_MS as f64;
        let base = self.base_delay_ms as f64;
        let ms = if self.exponential {
            let exp = attempt.min(128) as i32;
            base * RECONNECT_BACKOFF_FACTOR.powi(exp)
        } else {
            base
        };
        Duration::from_millis(ms.min(cap).floor() as u64)
    }

    /// Whether reconnection is turned off entirely.
    pub fn is_disabled(&self) -> bool {
        self.max_attempts == 0
    }

    /// Whether another attempt may be scheduled.
    pub fn can_retry(&self) -> bool {
        !self.is_disabled() && self.attempt_count < self.max_attempts
    }

    /// Claim the next attempt, returning its delay.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }
        let delay = self.delay_for(self.attempt_count);
        self.attempt_count += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, exponential: bool) -> ReconnectPolicy {
        ReconnectPolicy::new(&ReconnectConfig {
            max_attempts,
            base_delay_ms: 1000,
            exponential_backoff: exponential,
        })
    }

    #[test]
    fn test_exponential_delay_sequence() {
        let p = policy(10, true);
        let delays: Vec<u64> = (0..7).map(|a| p.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5062, 7593, 11390]);
    }

    #[test]
    fn test_delay_capped() {
        let p = policy(10, true);
        assert_eq!(p.delay_for(9), Duration::from_millis(30_000));
        assert_eq!(p.delay_for(50), Duration::from_millis(30_000));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_constant_delay() {
        let p = policy(10, false);
        assert_eq!(p.delay_for(0), Duration::from_millis(1000));
        assert_eq!(p.delay_for(6), Duration::from_millis(1000));
    }

    #[test]
    fn test_attempts_exhaust() {
        let mut p = policy(2, true);
        assert_eq!(p.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(p.next_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(p.next_delay(), None);
        assert_eq!(p.attempt_count(), 2);

        p.reset();
        assert_eq!(p.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_zero_max_attempts_disables() {
        let mut p = policy(0, true);
        assert!(p.is_disabled());
        assert_eq!(p.next_delay(), None);
    }
}
