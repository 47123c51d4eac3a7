//! Heartbeat liveness tracking.

use std::time::Duration;

use tokio::time::Instant;

use hc_core::constants::HEARTBEAT_DEAD_FACTOR;

/// Tracks the last heartbeat response for one connection.
///
/// Lives only while the connection is open; the dead verdict is handed
/// out once so the connection is force-closed a single time.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    last_response_at: Instant,
    dead_declared: bool,
}

impl HeartbeatMonitor {
    /// Start tracking. The connect time counts as the first response.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_response_at: now,
            dead_declared: false,
        }
    }

    pub fn record_response(&mut self, now: Instant) {
        self.last_response_at = now;
    }

    pub fn last_response_at(&self) -> Instant {
        self.last_response_at
    }

    /// Silence longer than this means the peer is gone.
    pub fn dead_after(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval.as_secs_f64() * HEARTBEAT_DEAD_FACTOR).unwrap_or(Duration::MAX)
    }

    /// Returns true the first time the peer is found dead, false afterwards.
    pub fn check_dead(&mut self, now: Instant) -> bool {
        if self.dead_declared {
            return false;
        }
        if now.saturating_duration_since(self.last_response_at) > self.dead_after() {
            self.dead_declared = true;
            return true;
        }
        false
    }
}
