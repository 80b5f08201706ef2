//! # scale-bridge
//!
//! Bridges a Sartorius/PMA laboratory scale to real-time observers.
//!
//! The library keeps a serial scale connected, polls it for readings, and
//! fans every reading and connection change out to WebSocket clients.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Heartbeat-based detection of silently dead links
//! - Escalating recovery: reconnect, then hardware reset when available
//! - JSON broadcast to any number of WebSocket clients
//!
//! ## Quick Start
//!
//! ```no_run
//! use scale_bridge::{Bridge, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scale_bridge::Error> {
//!     let bridge = Bridge::serial(BridgeConfig::from_env()?, None).await?;
//!     println!("Listening on ws://{}", bridge.local_addr());
//!
//!     let handle = bridge.handle();
//!     handle.tare().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Line codec, device commands and weight parsing
//! - [`types`] - Readings and connection state
//! - [`transport`] - Transport trait and the serial implementation
//! - [`supervisor`] - Connection lifecycle, heartbeat and recovery
//! - [`scheduler`] - The single polling loop that drives the device
//! - [`event`] - Async event system for readings and status changes
//! - [`hub`] - Session set and broadcast fan-out
//! - [`server`] - WebSocket endpoint
//! - [`bridge`] - High-level [`Bridge`] wiring it all together

pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use bridge::{Bridge, ScaleHandle};
pub use config::BridgeConfig;
pub use error::{CodecError, Error, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use hub::{BroadcastHub, ClientCommand, HubConfig, ServerMessage, SessionId, SessionSink};
pub use protocol::{LineCodec, ScaleCommand, parse_weight};
pub use scheduler::{DeviceCommand, PollingScheduler, SchedulerConfig};
pub use server::{ServerConfig, WsServer};
pub use supervisor::{ConnectionSupervisor, RecoveryCallback, SupervisorConfig};
pub use transport::{SerialTransport, Transport, serial::list_ports};
pub use types::{ConnectionState, StatusSnapshot, WeightReading};
