//! Connection supervision for the scale link.
//!
//! [`ConnectionSupervisor`] owns the transport and is the only place that
//! touches it. It keeps the link alive with three mechanisms:
//!
//! 1. **Connect protocol** - a failed link is torn down and reopened.
//! 2. **Heartbeat** - a link that stops yielding data for longer than the
//!    heartbeat timeout is treated as dead even without an I/O error.
//! 3. **Escalation** - once `reset_threshold` consecutive connect attempts
//!    have failed, the next failure triggers a hardware reset followed by
//!    one more connect. The counter restarts after every reset.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::protocol::{INTER_FRAME_DELAY, ScaleCommand};
use crate::transport::Transport;
use crate::types::{
    ConnectionState, HeartbeatState, RecoveryCounter, StatusSnapshot, WeightReading,
};

/// Default time without a successful read before the link is declared dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of consecutive failed connects before a hardware reset.
pub const DEFAULT_RESET_THRESHOLD: u32 = 2;

/// Message passed to the recovery callback.
pub const RECOVERY_MESSAGE: &str = "Scale connection recovered";

/// Observer notified when a hardware reset brought the scale back.
pub type RecoveryCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection state shared with observers.
pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

/// Configuration for the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time without a successful read before the link is declared dead.
    pub heartbeat_timeout: Duration,
    /// Consecutive failed connects tolerated before a hardware reset.
    pub reset_threshold: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reset_threshold: DEFAULT_RESET_THRESHOLD,
        }
    }
}

impl SupervisorConfig {
    /// Sets the heartbeat timeout.
    #[must_use]
    pub const fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the reset threshold.
    #[must_use]
    pub const fn reset_threshold(mut self, threshold: u32) -> Self {
        self.reset_threshold = threshold;
        self
    }
}

/// Supervises the link to the scale.
pub struct ConnectionSupervisor<T> {
    transport: T,
    config: SupervisorConfig,
    state: ConnectionState,
    heartbeat: HeartbeatState,
    failed_attempts: RecoveryCounter,
    current: Option<WeightReading>,
    status: SharedStatus,
    on_recovery: Option<RecoveryCallback>,
}

impl<T: Transport> ConnectionSupervisor<T> {
    /// Creates a supervisor for the given transport.
    #[must_use]
    pub fn new(transport: T, config: SupervisorConfig) -> Self {
        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            heartbeat: HeartbeatState::default(),
            failed_attempts: RecoveryCounter::default(),
            current: None,
            status: SharedStatus::default(),
            on_recovery: None,
        }
    }

    /// Sets the observer notified after an automatic recovery.
    #[must_use]
    pub fn with_recovery_callback(mut self, callback: RecoveryCallback) -> Self {
        self.on_recovery = Some(callback);
        self
    }

    /// Returns the shared status snapshot kept up to date by this supervisor.
    #[must_use]
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    /// Returns the current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Returns the heartbeat state.
    #[must_use]
    pub const fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }

    /// Returns the number of consecutive failed connect attempts.
    #[must_use]
    pub const fn failed_attempts(&self) -> u32 {
        self.failed_attempts.get()
    }

    /// Returns the latest reading accepted while connected.
    #[must_use]
    pub const fn current(&self) -> Option<&WeightReading> {
        self.current.as_ref()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Returns the transport's per-chunk framing prefix length.
    #[must_use]
    pub fn frame_prefix_len(&self) -> usize {
        self.transport.frame_prefix_len()
    }

    /// Makes sure the link is up, reconnecting if needed.
    ///
    /// Returns immediately if already connected with a live heartbeat.
    /// Otherwise runs the connect protocol, escalating to a hardware
    /// reset when the transport supports it and enough attempts failed.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.link_alive() {
            return true;
        }

        // Clean state before retry
        self.release_transport().await;
        self.state = ConnectionState::Connecting;

        let mut connected = self.try_connect().await;
        let mut recovered = false;

        if !connected && self.transport.supports_hardware_reset() {
            if self.failed_attempts.get() >= self.config.reset_threshold {
                tracing::warn!(
                    "connection failed {} times, attempting hardware reset",
                    self.failed_attempts.get() + 1
                );
                if self.hardware_reset().await {
                    connected = self.try_connect().await;
                    recovered = connected;
                }
                self.failed_attempts.reset();
            } else {
                self.failed_attempts.increment();
            }
        }

        if connected {
            self.mark_connected().await;
            if recovered {
                tracing::info!("scale recovered after hardware reset");
                if let Some(callback) = &self.on_recovery {
                    callback(RECOVERY_MESSAGE);
                }
            }
        } else {
            self.mark_disconnected().await;
        }
        connected
    }

    /// Checks the heartbeat of a connected link.
    ///
    /// Returns false if the link was connected and has just been dropped
    /// because no data arrived within the heartbeat timeout (or the
    /// transport closed underneath). Returns true otherwise.
    pub async fn check_heartbeat(&mut self) -> bool {
        if !self.state.is_connected() {
            return true;
        }

        if self.heartbeat.is_expired(self.config.heartbeat_timeout) {
            tracing::warn!(
                "heartbeat timeout - no data for {:.1}s",
                self.config.heartbeat_timeout.as_secs_f64()
            );
        } else if self.transport.is_connected() {
            return true;
        } else {
            tracing::warn!("transport closed unexpectedly");
        }

        self.disconnect().await;
        false
    }

    /// Marks a successful read.
    pub fn record_successful_read(&mut self) {
        self.heartbeat.record();
    }

    /// Stores `reading` as the current reading.
    ///
    /// Readings arriving while not connected are rejected.
    pub async fn accept_reading(&mut self, reading: WeightReading) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        self.current = Some(reading);
        self.publish().await;
        true
    }

    /// Releases the transport and forgets the heartbeat. Idempotent.
    pub async fn disconnect(&mut self) {
        self.release_transport().await;
        self.mark_disconnected().await;
    }

    /// Reconnects on explicit user request.
    ///
    /// Disconnects, performs a hardware reset when available, and connects,
    /// without waiting for the failure threshold.
    pub async fn manual_reconnect(&mut self) -> bool {
        tracing::info!("manual reconnect requested");
        self.disconnect().await;

        if self.transport.supports_hardware_reset() {
            tracing::info!("performing hardware reset");
            self.hardware_reset().await;
            self.failed_attempts.reset();
        }

        self.state = ConnectionState::Connecting;
        if self.try_connect().await {
            self.mark_connected().await;
            tracing::info!("scale reconnected");
            true
        } else {
            self.mark_disconnected().await;
            tracing::warn!("manual reconnect failed");
            false
        }
    }

    /// Writes a command to the scale.
    ///
    /// A write error drops the link.
    pub async fn send_command(&mut self, command: ScaleCommand) -> Result<()> {
        if !self.state.is_connected() {
            return Err(Error::NotConnected);
        }

        for (i, frame) in command.frames().into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_FRAME_DELAY).await;
            }
            if let Err(e) = self.transport.send(frame).await {
                tracing::warn!("{} failed, marking disconnected: {}", command.name(), e);
                self.disconnect().await;
                return Err(e);
            }
        }
        tracing::trace!("sent {}", command.name());
        Ok(())
    }

    /// Reads the next chunk from the scale, waiting at most `timeout`.
    ///
    /// Returns an empty chunk when nothing arrived or not connected. A
    /// read error drops the link.
    pub async fn read_chunk(&mut self, timeout: Duration) -> Bytes {
        if !self.state.is_connected() {
            return Bytes::new();
        }

        match self.transport.read_chunk(timeout).await {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("read error, marking disconnected: {}", e);
                self.disconnect().await;
                Bytes::new()
            }
        }
    }

    fn link_alive(&self) -> bool {
        self.state.is_connected()
            && self.transport.is_connected()
            && !self.heartbeat.is_expired(self.config.heartbeat_timeout)
    }

    async fn try_connect(&mut self) -> bool {
        match self.transport.connect().await {
            Ok(()) => true,
            Err(Error::PortNotFound) => {
                tracing::debug!("no scale found");
                false
            }
            Err(e) => {
                tracing::warn!("connection error: {}", e);
                false
            }
        }
    }

    async fn hardware_reset(&mut self) -> bool {
        match self.transport.hardware_reset().await {
            Ok(true) => {
                tracing::info!("hardware reset successful");
                true
            }
            Ok(false) => {
                tracing::warn!("hardware reset not performed");
                false
            }
            Err(e) => {
                tracing::warn!("hardware reset failed: {}", e);
                false
            }
        }
    }

    async fn release_transport(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!("error releasing transport: {}", e);
        }
    }

    async fn mark_connected(&mut self) {
        let was_connected = self.state.is_connected();
        self.state = ConnectionState::Connected;
        self.heartbeat.record();
        self.failed_attempts.reset();
        if !was_connected {
            tracing::info!("scale connected");
        }
        self.publish().await;
    }

    async fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.heartbeat.clear();
        self.publish().await;
    }

    async fn publish(&self) {
        let mut status = self.status.write().await;
        status.connected = self.state.is_connected();
        status.current.clone_from(&self.current);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::transport::mock::MockTransport;

    fn supervisor(transport: MockTransport) -> ConnectionSupervisor<MockTransport> {
        ConnectionSupervisor::new(transport, SupervisorConfig::default())
    }

    fn counting_callback() -> (RecoveryCallback, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let callback: RecoveryCallback = Arc::new(move |message: &str| {
            assert_eq!(message, RECOVERY_MESSAGE);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);

        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(sup.ensure_connected().await);

        assert_eq!(sup.state(), ConnectionState::Connected);
        assert!(sup.heartbeat().last_successful_read().is_some());
        assert_eq!(sup.failed_attempts(), 0);
        assert!(sup.status().read().await.connected);
        assert_eq!(mock.lock().unwrap().connect_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_is_noop() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);

        assert!(sup.ensure_connected().await);
        let disconnects = mock.lock().unwrap().disconnect_calls;

        assert!(sup.ensure_connected().await);
        let state = mock.lock().unwrap();
        assert_eq!(state.connect_calls, 1);
        assert_eq!(state.disconnect_calls, disconnects);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_two_failures() {
        let (transport, mock) = MockTransport::resettable();
        mock.lock().unwrap().connect_results = [false, false, false, true].into();
        let (callback, recoveries) = counting_callback();
        let mut sup = supervisor(transport).with_recovery_callback(callback);

        assert!(!sup.ensure_connected().await);
        assert_eq!(sup.failed_attempts(), 1);
        assert!(!sup.ensure_connected().await);
        assert_eq!(sup.failed_attempts(), 2);
        assert_eq!(mock.lock().unwrap().reset_calls, 0);

        assert!(sup.ensure_connected().await);
        assert_eq!(mock.lock().unwrap().reset_calls, 1);
        assert_eq!(mock.lock().unwrap().connect_calls, 4);
        assert_eq!(sup.failed_attempts(), 0);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_counter_cleared_when_retry_fails() {
        let (transport, mock) = MockTransport::resettable();
        mock.lock().unwrap().connect_results = [false; 8].into();
        let (callback, recoveries) = counting_callback();
        let mut sup = supervisor(transport).with_recovery_callback(callback);

        assert!(!sup.ensure_connected().await);
        assert!(!sup.ensure_connected().await);
        assert!(!sup.ensure_connected().await);

        assert_eq!(mock.lock().unwrap().reset_calls, 1);
        assert_eq!(sup.failed_attempts(), 0);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);

        // The escalation starts over
        assert!(!sup.ensure_connected().await);
        assert!(!sup.ensure_connected().await);
        assert_eq!(mock.lock().unwrap().reset_calls, 1);
        assert!(!sup.ensure_connected().await);
        assert_eq!(mock.lock().unwrap().reset_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_reconnect_does_not_fire_callback() {
        let (transport, mock) = MockTransport::resettable();
        mock.lock().unwrap().connect_results = [false, true].into();
        let (callback, recoveries) = counting_callback();
        let mut sup = supervisor(transport).with_recovery_callback(callback);

        assert!(!sup.ensure_connected().await);
        assert!(sup.ensure_connected().await);

        assert_eq!(sup.failed_attempts(), 0);
        assert_eq!(mock.lock().unwrap().reset_calls, 0);
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_escalation_without_reset_capability() {
        let (transport, mock) = MockTransport::new();
        mock.lock().unwrap().connect_results = [false; 5].into();
        let mut sup = supervisor(transport);

        for _ in 0..5 {
            assert!(!sup.ensure_connected().await);
        }
        assert_eq!(sup.failed_attempts(), 0);
        assert_eq!(mock.lock().unwrap().reset_calls, 0);
        assert_eq!(mock.lock().unwrap().connect_calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configurable_threshold() {
        let (transport, mock) = MockTransport::resettable();
        mock.lock().unwrap().connect_results = [false].into();
        let config = SupervisorConfig::default().reset_threshold(0);
        let mut sup = ConnectionSupervisor::new(transport, config);

        assert!(sup.ensure_connected().await);
        assert_eq!(mock.lock().unwrap().reset_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_disconnects() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);
        assert!(sup.ensure_connected().await);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(sup.check_heartbeat().await);
        sup.record_successful_read();

        tokio::time::advance(Duration::from_millis(1900)).await;
        assert!(sup.check_heartbeat().await);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!sup.check_heartbeat().await);

        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(sup.heartbeat().last_successful_read().is_none());
        assert!(!mock.lock().unwrap().open);
        assert!(!sup.status().read().await.connected);

        // Already disconnected: nothing more to report
        assert!(sup.check_heartbeat().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_detects_closed_transport() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);
        assert!(sup.ensure_connected().await);

        mock.lock().unwrap().open = false;
        assert!(!sup.check_heartbeat().await);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_heartbeat_forces_reconnect() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);
        assert!(sup.ensure_connected().await);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(sup.ensure_connected().await);

        let state = mock.lock().unwrap();
        assert_eq!(state.connect_calls, 2);
        assert!(state.disconnect_calls >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_accepted_only_when_connected() {
        let (transport, _mock) = MockTransport::new();
        let mut sup = supervisor(transport);

        let reading = WeightReading::new("1.0 g", Some(1.0), "g");
        assert!(!sup.accept_reading(reading.clone()).await);
        assert!(sup.current().is_none());

        assert!(sup.ensure_connected().await);
        assert!(sup.accept_reading(reading.clone()).await);
        assert_eq!(sup.current(), Some(&reading));
        assert_eq!(sup.status().read().await.current, Some(reading.clone()));

        // The last reading survives a disconnect
        sup.disconnect().await;
        assert_eq!(sup.current(), Some(&reading));
        let snapshot = sup.status().read().await.clone();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.current, Some(reading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let (transport, _mock) = MockTransport::new();
        let mut sup = supervisor(transport);

        sup.disconnect().await;
        sup.disconnect().await;
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        assert!(sup.ensure_connected().await);
        sup.disconnect().await;
        sup.disconnect().await;
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_resets_hardware() {
        let (transport, mock) = MockTransport::resettable();
        mock.lock().unwrap().connect_results = [false].into();
        let (callback, recoveries) = counting_callback();
        let mut sup = supervisor(transport).with_recovery_callback(callback);

        assert!(!sup.ensure_connected().await);
        assert_eq!(sup.failed_attempts(), 1);

        assert!(sup.manual_reconnect().await);
        assert_eq!(mock.lock().unwrap().reset_calls, 1);
        assert_eq!(sup.failed_attempts(), 0);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_without_reset_capability() {
        let (transport, mock) = MockTransport::new();
        mock.lock().unwrap().connect_results = [false].into();
        let mut sup = supervisor(transport);

        assert!(!sup.manual_reconnect().await);
        assert_eq!(mock.lock().unwrap().reset_calls, 0);
        assert!(sup.manual_reconnect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_writes_frames() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);

        assert!(matches!(
            sup.send_command(ScaleCommand::Tare).await,
            Err(Error::NotConnected)
        ));

        assert!(sup.ensure_connected().await);
        sup.send_command(ScaleCommand::Tare).await.unwrap();
        sup.send_command(ScaleCommand::Zero).await.unwrap();

        assert_eq!(mock.lock().unwrap().written_commands(), b"TZ0T".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_disconnects() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);
        assert!(sup.ensure_connected().await);

        mock.lock().unwrap().fail_sends = true;
        assert!(sup.send_command(ScaleCommand::RequestWeight).await.is_err());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_disconnects() {
        let (transport, mock) = MockTransport::new();
        let mut sup = supervisor(transport);
        assert!(sup.read_chunk(Duration::from_millis(100)).await.is_empty());

        assert!(sup.ensure_connected().await);
        {
            let mut state = mock.lock().unwrap();
            state.push_chunk(b"1.0 g\r\n");
            state.chunks.push_back(Err(Error::ConnectionClosed));
        }

        let chunk = sup.read_chunk(Duration::from_millis(100)).await;
        assert_eq!(&chunk[..], b"1.0 g\r\n");
        assert!(sup.read_chunk(Duration::from_millis(100)).await.is_empty());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }
}
