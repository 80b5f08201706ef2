//! Fan-out of scale events to observer sessions.
//!
//! The hub keeps the set of connected sessions, greets each new session
//! with a status snapshot, turns client commands into device commands,
//! and broadcasts every scale event to all sessions. A session whose send
//! fails or stalls is dropped without affecting the others.

pub mod message;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::{Event, Subscription};
use crate::scheduler::DeviceCommand;
use crate::supervisor::SharedStatus;

pub use message::{ClientCommand, ClientMessage, ServerMessage};

/// Default time a single session send may take.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Boxed future returned by session sends.
pub type SessionFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Outbound half of an observer session.
pub trait SessionSink: Send + Sync {
    /// Sends one text message to the observer.
    fn send(&self, text: String) -> SessionFuture<'_>;
}

/// Identifies a session within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Configuration for the broadcast hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Time a single session send may take before the session is dropped.
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl HubConfig {
    /// Sets the per-session send timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// Broadcasts scale events to every connected session.
pub struct BroadcastHub {
    sessions: RwLock<HashMap<SessionId, Arc<dyn SessionSink>>>,
    next_id: AtomicU64,
    status: SharedStatus,
    commands: mpsc::Sender<DeviceCommand>,
    config: HubConfig,
    // Serializes broadcasts so every session sees events in order
    delivery: Mutex<()>,
}

impl BroadcastHub {
    /// Creates a hub reading snapshots from `status` and forwarding
    /// client commands to `commands`.
    #[must_use]
    pub fn new(
        status: SharedStatus,
        commands: mpsc::Sender<DeviceCommand>,
        config: HubConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            status,
            commands,
            config,
            delivery: Mutex::new(()),
        }
    }

    /// Returns the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Registers a session and sends it the current status snapshot.
    pub async fn on_client_connect(&self, sink: Arc<dyn SessionSink>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Hold delivery so no broadcast overtakes the snapshot
        let _delivery = self.delivery.lock().await;
        self.sessions.write().await.insert(id, Arc::clone(&sink));

        let snapshot = self.status.read().await.clone();
        let greeting = ServerMessage::from(snapshot);
        tracing::info!("{} connected", id);

        if let Err(e) = self.deliver(&sink, &greeting).await {
            tracing::warn!("failed to send snapshot to {}: {}", id, e);
            self.sessions.write().await.remove(&id);
        }
        id
    }

    /// Handles a text message from a session.
    ///
    /// Recognized commands are queued for the device and acknowledged to
    /// the sender. Anything else is dropped.
    pub async fn on_client_message(&self, id: SessionId, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("ignoring message from {}: {}", id, e);
                return;
            }
        };

        let command = message.command;
        tracing::info!("{} requested {:?}", id, command);
        if self.commands.send(command.device_command()).await.is_err() {
            tracing::warn!("device loop is gone, dropping {:?}", command);
            return;
        }

        let Some(sink) = self.sessions.read().await.get(&id).cloned() else {
            return;
        };
        if let Err(e) = self.deliver(&sink, &ServerMessage::Ack { command }).await {
            tracing::warn!("failed to acknowledge {}: {}", id, e);
            self.on_client_disconnect(id).await;
        }
    }

    /// Removes a session. Safe to call more than once.
    pub async fn on_client_disconnect(&self, id: SessionId) {
        if self.sessions.write().await.remove(&id).is_some() {
            tracing::info!("{} disconnected", id);
        }
    }

    /// Sends `message` to every session concurrently.
    ///
    /// Sessions whose send fails or times out are removed. Returns the
    /// number of sessions that received the message.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let _delivery = self.delivery.lock().await;
        let sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let results = join_all(sessions.iter().map(|(id, sink)| {
            let text = text.clone();
            async move { (*id, self.send_text(sink, text).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("dropping {}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in failed {
                sessions.remove(&id);
            }
        }
        delivered
    }

    /// Broadcasts events from `subscription` until `cancel` fires.
    pub async fn run(&self, mut subscription: Subscription, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let message = match event {
                Event::Status { connected } => ServerMessage::Status {
                    connected,
                    weight: self.status.read().await.current.clone(),
                },
                Event::Weight(data) => ServerMessage::Weight { data },
            };
            self.broadcast(&message).await;
        }
        tracing::debug!("broadcast loop stopped");
    }

    async fn deliver(&self, sink: &Arc<dyn SessionSink>, message: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.send_text(sink, text).await
    }

    async fn send_text(&self, sink: &Arc<dyn SessionSink>, text: String) -> Result<()> {
        let timeout = self.config.send_timeout;
        tokio::time::timeout(timeout, sink.send(text))
            .await
            .map_err(|_| Error::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}
