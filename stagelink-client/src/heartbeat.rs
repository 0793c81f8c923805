//! Heartbeat liveness tracking.
//!
//! The connection loop sends a heartbeat frame on a fixed interval and
//! consults this monitor on each tick; the inbound heartbeat kind is handled
//! through the ordinary event dispatch path and simply stamps the monitor.
//! Liveness is therefore purely a function of generic event handling plus a
//! periodic check.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Tracks the time of the last inbound heartbeat.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    last_received: Mutex<Instant>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            last_received: Mutex::new(Instant::now()),
        }
    }

    /// Restarts the monitor when a new connection is established.
    pub fn reset(&self) {
        *self.last_received.lock() = Instant::now();
    }

    /// Stamps receipt of an inbound heartbeat.
    pub fn stamp(&self) {
        *self.last_received.lock() = Instant::now();
    }

    /// Time elapsed since the last inbound heartbeat.
    pub fn elapsed(&self) -> Duration {
        self.last_received.lock().elapsed()
    }

    /// Returns true if no heartbeat arrived within `timeout`.
    pub fn expired(&self, timeout: Duration) -> bool {
        self.elapsed() > timeout
    }
}
