//! Transport layer for scale communication.
//!
//! This module provides the abstraction the connection supervisor drives.
//! Only the virtual serial port adapter is implemented here; raw USB
//! adapters implement the same trait and report their framing prefix
//! through [`Transport::frame_prefix_len`].

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the link to the device.
    fn connect(&mut self) -> TransportFuture<'_, ()>;

    /// Releases the link. Must be safe to call when already closed.
    fn disconnect(&mut self) -> TransportFuture<'_, ()>;

    /// Writes raw bytes to the device.
    fn send(&mut self, data: Bytes) -> TransportFuture<'_, ()>;

    /// Reads whatever the device has sent, waiting at most `timeout`.
    ///
    /// An elapsed timeout yields an empty chunk, not an error.
    fn read_chunk(&mut self, timeout: Duration) -> TransportFuture<'_, Bytes>;

    /// Returns true if the link is open.
    fn is_connected(&self) -> bool;

    /// Returns true if [`Transport::hardware_reset`] does anything.
    fn supports_hardware_reset(&self) -> bool {
        false
    }

    /// Power-cycles or re-enumerates the device link.
    ///
    /// Returns whether the reset was performed.
    fn hardware_reset(&mut self) -> TransportFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }

    /// Number of status bytes prepended to every chunk returned by
    /// [`Transport::read_chunk`].
    fn frame_prefix_len(&self) -> usize {
        0
    }
}

pub use serial::SerialTransport;
