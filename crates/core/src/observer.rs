//! Connection lifecycle observer.

use std::time::{Duration, Instant};

/// Receives connection events of a publishing session.
///
/// Each connection attempt ends in exactly one terminal event:
/// [`on_connection_failed`](Self::on_connection_failed) or
/// [`on_disconnect`](Self::on_disconnect). Callbacks may run on a network
/// thread and must not block.
pub trait ConnectChecker: Send + Sync {
    fn on_connection_success(&self);
    fn on_connection_failed(&self, reason: &str);
    fn on_disconnect(&self);
    fn on_auth_error(&self);
    fn on_auth_success(&self);
    /// Outgoing bitrate in bits per second, reported once per second while connected.
    fn on_new_bitrate(&self, _bitrate: u64) {}
}

/// Turns a stream of written byte counts into a bits-per-second figure.
#[derive(Debug)]
pub struct BitrateMeter {
    window: Duration,
    started: Option<Instant>,
    bytes: u64,
}

impl Default for BitrateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl BitrateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: None,
            bytes: 0,
        }
    }

    /// Account for `bytes`; yields the bitrate when a window completes.
    pub fn record(&mut self, bytes: usize) -> Option<u64> {
        self.record_at(bytes, Instant::now())
    }

    pub fn record_at(&mut self, bytes: usize, now: Instant) -> Option<u64> {
        let started = *self.started.get_or_insert(now);
        self.bytes += bytes as u64;
        let elapsed = now.duration_since(started);
        if elapsed < self.window {
            return None;
        }
        let bitrate = (self.bytes * 8 * 1000) / (elapsed.as_millis().max(1) as u64);
        self.bytes = 0;
        self.started = Some(now);
        Some(bitrate)
    }

    pub fn reset(&mut self) {
        self.started = None;
        self.bytes = 0;
    }
}
