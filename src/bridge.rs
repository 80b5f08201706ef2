//! Main [`Bridge`] implementation.
//!
//! A bridge wires a transport to observers: it runs the polling loop, the
//! broadcast hub and the WebSocket server as background tasks, and hands
//! out [`ScaleHandle`]s for in-process control.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::hub::BroadcastHub;
use crate::scheduler::{COMMAND_QUEUE_CAPACITY, DeviceCommand, PollingScheduler};
use crate::server::WsServer;
use crate::supervisor::{ConnectionSupervisor, RecoveryCallback, SharedStatus};
use crate::transport::{SerialTransport, Transport};
use crate::types::StatusSnapshot;

/// Capacity of the event channel.
pub const EVENT_CAPACITY: usize = 256;

/// Cloneable control handle for a running bridge.
///
/// Every command is executed by the polling loop, in order with its reads.
#[derive(Clone)]
pub struct ScaleHandle {
    commands: mpsc::Sender<DeviceCommand>,
    events: EventDispatcher,
    status: SharedStatus,
}

impl ScaleHandle {
    /// Queues a tare.
    pub async fn tare(&self) -> Result<()> {
        self.send(DeviceCommand::Tare).await
    }

    /// Queues a zero.
    pub async fn zero(&self) -> Result<()> {
        self.send(DeviceCommand::Zero).await
    }

    /// Queues an immediate weight request.
    pub async fn request_weight(&self) -> Result<()> {
        self.send(DeviceCommand::RequestWeight).await
    }

    /// Disconnects, resets the hardware if possible, and reconnects.
    ///
    /// Returns whether the scale is connected afterwards.
    pub async fn reconnect(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(DeviceCommand::Reconnect(tx)).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Subscribes to scale events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Waits up to `timeout` for the next event matching `predicate`.
    ///
    /// Only events dispatched after the call are considered.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Option<Event>
    where
        F: Fn(&Event) -> bool,
    {
        self.events.wait_for(predicate, timeout).await
    }

    /// Returns the number of live event subscriptions, the hub's included.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Returns the current connection state and last reading.
    pub async fn status(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }

    async fn send(&self, command: DeviceCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

/// A running scale bridge.
pub struct Bridge {
    handle: ScaleHandle,
    hub: Arc<BroadcastHub>,
    local_addr: SocketAddr,
    cancel: CancellationToken,

    // Background tasks
    scheduler_task: Option<JoinHandle<()>>,
    hub_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Starts a bridge for the serial scale described by `config`.
    pub async fn serial(
        config: BridgeConfig,
        on_recovery: Option<RecoveryCallback>,
    ) -> Result<Self> {
        let transport = SerialTransport::new(config.serial.clone());
        Self::start(transport, config, on_recovery).await
    }

    /// Starts a bridge over `transport`.
    ///
    /// Binds the WebSocket listener, then spawns the polling loop, the
    /// broadcast hub and the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn start<T: Transport + 'static>(
        transport: T,
        config: BridgeConfig,
        on_recovery: Option<RecoveryCallback>,
    ) -> Result<Self> {
        let events = EventDispatcher::new(EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let mut supervisor = ConnectionSupervisor::new(transport, config.supervisor);
        if let Some(callback) = on_recovery {
            supervisor = supervisor.with_recovery_callback(callback);
        }
        let status = supervisor.status();

        let hub = Arc::new(BroadcastHub::new(
            Arc::clone(&status),
            command_tx.clone(),
            config.hub,
        ));
        let server = WsServer::bind(&config.server, Arc::clone(&hub)).await?;
        let local_addr = server.local_addr()?;

        let cancel = CancellationToken::new();

        // Subscribe before the loop starts so the hub sees every event
        let subscription = events.subscribe();
        let hub_task = tokio::spawn({
            let hub = Arc::clone(&hub);
            let cancel = cancel.clone();
            async move { hub.run(subscription, cancel).await }
        });

        let scheduler = PollingScheduler::new(supervisor, events.clone(), config.scheduler, command_rx);
        let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));
        let server_task = tokio::spawn(server.run(cancel.clone()));

        tracing::info!("bridge started on ws://{}", local_addr);

        Ok(Self {
            handle: ScaleHandle {
                commands: command_tx,
                events,
                status,
            },
            hub,
            local_addr,
            cancel,
            scheduler_task: Some(scheduler_task),
            hub_task: Some(hub_task),
            server_task: Some(server_task),
        })
    }

    /// Returns a control handle.
    #[must_use]
    pub fn handle(&self) -> ScaleHandle {
        self.handle.clone()
    }

    /// Returns the address the WebSocket server is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of connected observers.
    pub async fn client_count(&self) -> usize {
        self.hub.session_count().await
    }

    /// Stops the bridge.
    ///
    /// Returns once the transport is released and the listener closed.
    /// Pending broadcasts are abandoned.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down bridge");
        self.cancel.cancel();

        if let Some(task) = self.scheduler_task.take() {
            if let Err(e) = task.await {
                tracing::error!("polling loop failed: {}", e);
            }
        }
        if let Some(task) = self.server_task.take() {
            if let Err(e) = task.await {
                tracing::error!("server task failed: {}", e);
            }
        }
        if let Some(task) = self.hub_task.take() {
            task.abort();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
