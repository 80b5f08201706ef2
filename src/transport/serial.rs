//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for scales exposed by
//! their driver as a virtual COM port (or `/dev/tty*` node).

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortInfo, SerialPortType,
    SerialStream, StopBits,
};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportFuture};

/// Default baud rate for Sartorius scales.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default connection delay.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(100);

/// Size of a single read.
const READ_BUFFER_SIZE: usize = 256;

/// USB identifiers of supported scales: `(vid, pid, name)`.
pub const SUPPORTED_SCALES: &[(u16, u16, &str)] = &[
    (0x24BC, 0x2010, "PMA Evolution"),
    (0x0403, 0x6001, "PMA Power"),
];

/// A serial port that looks like a supported scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePort {
    /// Port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Model name, or a generic name when matched by description.
    pub name: String,
}

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path; `None` auto-detects the first supported scale.
    pub port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the link is reported usable.
    pub connection_delay: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }
}

impl SerialConfig {
    /// Creates a configuration that auto-detects the scale port.
    #[must_use]
    pub fn auto_detect() -> Self {
        Self::default()
    }

    /// Creates a configuration for a fixed port.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            ..Self::default()
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for scale communication.
pub struct SerialTransport {
    config: SerialConfig,
    stream: Option<SerialStream>,
    scale_name: Option<String>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
            scale_name: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the name of the connected scale, if known.
    #[must_use]
    pub fn scale_name(&self) -> Option<&str> {
        self.scale_name.as_deref()
    }

    fn resolve_port(&self) -> Result<ScalePort> {
        if let Some(port) = &self.config.port {
            return Ok(ScalePort {
                port: port.clone(),
                name: "Serial Scale".into(),
            });
        }
        list_ports()?.into_iter().next().ok_or(Error::PortNotFound)
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.stream.is_some() {
                return Ok(());
            }

            let target = self.resolve_port()?;
            tracing::info!("connecting to {} on {}", target.name, target.port);

            let stream = tokio_serial::new(&target.port, self.config.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Wait for the USB-serial bridge to settle
            tokio::time::sleep(self.config.connection_delay).await;

            self.stream = Some(stream);
            self.scale_name = Some(target.name);

            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.stream.take().is_some() {
                tracing::info!("disconnecting from serial port");
            }
            self.scale_name = None;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            tracing::trace!("sending {} bytes", data.len());

            stream.write_all(&data).await.map_err(Error::Io)?;
            stream.flush().await.map_err(Error::Io)?;
            Ok(())
        })
    }

    fn read_chunk(&mut self, timeout: Duration) -> TransportFuture<'_, Bytes> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            let mut buf = [0u8; READ_BUFFER_SIZE];

            match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
                Err(_) => Ok(Bytes::new()),
                Ok(Ok(0)) => {
                    tracing::debug!("serial port closed");
                    Err(Error::ConnectionClosed)
                }
                Ok(Ok(n)) => {
                    tracing::trace!("received {} bytes", n);
                    Ok(Bytes::copy_from_slice(&buf[..n]))
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
                Ok(Err(e)) => Err(Error::Io(e)),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Lists serial ports that look like supported scales.
///
/// Ports are matched by USB VID/PID first, then by a product or
/// manufacturer string mentioning Sartorius or PMA.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<ScalePort>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.iter().filter_map(identify_scale).collect())
}

fn identify_scale(info: &SerialPortInfo) -> Option<ScalePort> {
    let SerialPortType::UsbPort(usb) = &info.port_type else {
        return None;
    };

    let name = SUPPORTED_SCALES
        .iter()
        .find(|(vid, pid, _)| *vid == usb.vid && *pid == usb.pid)
        .map(|(_, _, name)| (*name).to_owned())
        .or_else(|| {
            let description = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            if description.contains("sartorius") {
                Some("Sartorius Scale".to_owned())
            } else if description.contains("pma") {
                Some("PMA Scale".to_owned())
            } else {
                None
            }
        })?;

    Some(ScalePort {
        port: info.port_name.clone(),
        name,
    })
}
