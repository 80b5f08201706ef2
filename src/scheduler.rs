//! The device polling loop.
//!
//! [`PollingScheduler`] is the only task that drives the transport. Every
//! tick it checks the heartbeat, reconnects if needed, requests a fresh
//! reading, and drains whatever the scale has sent. Commands from clients
//! are queued to the same task so they never interleave with a tick.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventDispatcher};
use crate::protocol::{LineCodec, ScaleCommand, parse_weight};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Transport;

/// Default tick period.
pub const DEFAULT_TICK: Duration = Duration::from_millis(20);

/// Default minimum time between weight requests.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(300);

/// Default wait after a failed connect.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default per-tick read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Capacity of the device command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Configuration for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tick period while connected.
    pub tick: Duration,
    /// Minimum time between weight requests.
    pub request_interval: Duration,
    /// Wait after a failed connect.
    pub retry_delay: Duration,
    /// How long one read may wait for data.
    pub read_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    /// Sets the tick period.
    #[must_use]
    pub const fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the weight request interval.
    #[must_use]
    pub const fn request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    /// Sets the retry delay.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// A request for the polling loop.
#[derive(Debug)]
pub enum DeviceCommand {
    /// Tare the scale.
    Tare,
    /// Zero the scale.
    Zero,
    /// Request a reading now.
    RequestWeight,
    /// Reconnect with a hardware reset; replies with the outcome.
    Reconnect(oneshot::Sender<bool>),
}

/// Single-task polling loop over a [`ConnectionSupervisor`].
pub struct PollingScheduler<T> {
    supervisor: ConnectionSupervisor<T>,
    codec: LineCodec,
    events: EventDispatcher,
    config: SchedulerConfig,
    commands: mpsc::Receiver<DeviceCommand>,
    announced_connected: bool,
    last_request: Option<Instant>,
}

impl<T: Transport> PollingScheduler<T> {
    /// Creates a scheduler publishing to `events` and serving `commands`.
    #[must_use]
    pub fn new(
        supervisor: ConnectionSupervisor<T>,
        events: EventDispatcher,
        config: SchedulerConfig,
        commands: mpsc::Receiver<DeviceCommand>,
    ) -> Self {
        let codec = LineCodec::with_prefix_len(supervisor.frame_prefix_len());
        Self {
            supervisor,
            codec,
            events,
            config,
            commands,
            announced_connected: false,
            last_request: None,
        }
    }

    /// Returns the supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &ConnectionSupervisor<T> {
        &self.supervisor
    }

    /// Runs until `cancel` fires, then disconnects.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("polling loop started");
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }

                () = tokio::time::sleep_until(next_tick) => {
                    let delay = self.tick().await;
                    next_tick = Instant::now() + delay;
                }
            }
        }

        self.supervisor.disconnect().await;
        self.announce(false);
        tracing::info!("polling loop stopped");
    }

    /// Runs one iteration and returns how long to wait before the next.
    pub async fn tick(&mut self) -> Duration {
        if !self.supervisor.check_heartbeat().await {
            self.announce(false);
        }

        if !self.supervisor.is_connected() {
            if !self.supervisor.ensure_connected().await {
                self.announce(false);
                return self.config.retry_delay;
            }
            self.codec.clear();
            self.last_request = None;
            self.announce(true);
        }

        let due = self
            .last_request
            .is_none_or(|at| at.elapsed() >= self.config.request_interval);
        if due {
            self.request_weight().await;
        }

        let chunk = self.supervisor.read_chunk(self.config.read_timeout).await;
        if !chunk.is_empty() {
            self.process_chunk(&chunk).await;
        }

        self.announce(self.supervisor.is_connected());
        self.config.tick
    }

    async fn process_chunk(&mut self, chunk: &[u8]) {
        if let Err(e) = self.codec.feed(chunk) {
            tracing::warn!("discarding scale output: {}", e);
        }

        while let Some(line) = self.codec.drain_line() {
            tracing::debug!("scale: {}", line);
            let reading = parse_weight(&line);
            self.supervisor.record_successful_read();
            if self.supervisor.accept_reading(reading.clone()).await {
                self.events.dispatch(Event::Weight(reading));
            }
        }
    }

    async fn request_weight(&mut self) {
        self.last_request = Some(Instant::now());
        if let Err(e) = self.supervisor.send_command(ScaleCommand::RequestWeight).await {
            tracing::debug!("weight request failed: {}", e);
        }
    }

    async fn handle_command(&mut self, command: DeviceCommand) {
        tracing::debug!("handling {:?}", command);
        let scale_command = match command {
            DeviceCommand::Tare => ScaleCommand::Tare,
            DeviceCommand::Zero => ScaleCommand::Zero,
            DeviceCommand::RequestWeight => ScaleCommand::RequestWeight,
            DeviceCommand::Reconnect(reply) => {
                let connected = self.supervisor.manual_reconnect().await;
                if connected {
                    self.codec.clear();
                    self.last_request = None;
                }
                self.announce(connected);
                let _ = reply.send(connected);
                return;
            }
        };

        match self.supervisor.send_command(scale_command).await {
            Ok(()) => tracing::info!("{} sent", scale_command.name()),
            Err(e) => {
                tracing::warn!("{} failed: {}", scale_command.name(), e);
                self.announce(self.supervisor.is_connected());
            }
        }
    }

    /// Publishes a status event when the connection flag changed.
    fn announce(&mut self, connected: bool) {
        if self.announced_connected != connected {
            self.announced_connected = connected;
            self.events.dispatch(Event::Status { connected });
        }
    }
}
