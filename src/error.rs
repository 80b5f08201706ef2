//! Error types for the scale bridge.

use thiserror::Error;

/// The main error type for bridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No serial port matching a supported scale was found.
    #[error("no scale port found")]
    PortNotFound,

    /// The device closed the link.
    #[error("connection closed by device")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The polling loop is no longer running.
    #[error("channel closed")]
    ChannelClosed,
}

/// Line codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Buffered data exceeded the maximum line length without a terminator.
    #[error("line too long: {size} bytes exceeds maximum {max}")]
    LineTooLong { size: usize, max: usize },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;
