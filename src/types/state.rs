//! Connection state types.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::WeightReading;

/// Lifecycle state of the scale link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link to the device.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Link open and heartbeat alive.
    Connected,
}

impl ConnectionState {
    /// Returns true if connected.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Time of the last successful read.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatState {
    last_successful_read: Option<Instant>,
}

impl HeartbeatState {
    /// Marks a successful read now.
    pub fn record(&mut self) {
        self.last_successful_read = Some(Instant::now());
    }

    /// Forgets the last read.
    pub fn clear(&mut self) {
        self.last_successful_read = None;
    }

    /// Returns the time of the last successful read, if any.
    #[must_use]
    pub const fn last_successful_read(&self) -> Option<Instant> {
        self.last_successful_read
    }

    /// Returns seconds since the last successful read, infinite if never.
    #[must_use]
    pub fn seconds_since_last_read(&self) -> f64 {
        self.last_successful_read
            .map_or(f64::INFINITY, |at| at.elapsed().as_secs_f64())
    }

    /// Returns true if more than `timeout` passed since the last read.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.seconds_since_last_read() > timeout.as_secs_f64()
    }
}

/// Consecutive failed connect attempts since the last success or reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryCounter(u32);

impl RecoveryCounter {
    /// Counts one failed attempt and returns the new count.
    pub fn increment(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    /// Resets the count to zero.
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// Returns the current count.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// What a newly joined observer is told.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Whether the scale is connected.
    pub connected: bool,
    /// Latest reading taken while connected.
    pub current: Option<WeightReading>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_never_read_is_expired() {
        let heartbeat = HeartbeatState::default();
        assert!(heartbeat.seconds_since_last_read().is_infinite());
        assert!(heartbeat.is_expired(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_expiry() {
        let mut heartbeat = HeartbeatState::default();
        heartbeat.record();
        assert!(!heartbeat.is_expired(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(!heartbeat.is_expired(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(heartbeat.is_expired(Duration::from_secs(2)));

        heartbeat.clear();
        assert!(heartbeat.last_successful_read().is_none());
    }

    #[test]
    fn test_recovery_counter() {
        let mut counter = RecoveryCounter::default();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }
}
