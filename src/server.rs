//! WebSocket endpoint for observers.
//!
//! Each accepted connection becomes a hub session: outbound messages go
//! through [`WsSession`], inbound text frames are handed to the hub as
//! client commands.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::hub::{BroadcastHub, SessionFuture, SessionSink};

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 8765;

/// Configuration for the WebSocket server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
        }
    }
}

impl ServerConfig {
    /// Sets the listen address.
    #[must_use]
    pub const fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Outbound half of a WebSocket connection.
pub struct WsSession {
    sink: Mutex<WsSink>,
}

impl SessionSink for WsSession {
    fn send(&self, text: String) -> SessionFuture<'_> {
        Box::pin(async move {
            self.sink.lock().await.send(Message::Text(text)).await?;
            Ok(())
        })
    }
}

/// Accepts WebSocket connections and attaches them to a hub.
pub struct WsServer {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
}

impl WsServer {
    /// Binds the listening socket.
    pub async fn bind(config: &ServerConfig, hub: Arc<BroadcastHub>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self { listener, hub })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("WebSocket server listening on ws://{}", addr);
        }

        loop {
            let accepted = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("new connection from {}", peer);
                    let hub = Arc::clone(&self.hub);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(hub, stream, cancel).await {
                            tracing::warn!("connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("failed to accept connection: {}", e);
                }
            }
        }
        tracing::info!("WebSocket server stopped");
    }
}

async fn handle_connection(
    hub: Arc<BroadcastHub>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (sink, mut incoming) = ws_stream.split();

    let session = Arc::new(WsSession {
        sink: Mutex::new(sink),
    });
    let id = hub.on_client_connect(session).await;

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = incoming.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => hub.on_client_message(id, &text).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!("{} read error: {}", id, e);
                break;
            }
            Some(Ok(_)) => {}
        }
    }

    hub.on_client_disconnect(id).await;
    Ok(())
}
