//! Bridge configuration.
//!
//! Every component has its own builder-style config; [`BridgeConfig`]
//! bundles them and can be read from `SCALE_BRIDGE_*` environment
//! variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::hub::HubConfig;
use crate::scheduler::SchedulerConfig;
use crate::server::ServerConfig;
use crate::supervisor::SupervisorConfig;
use crate::transport::serial::SerialConfig;

/// Serial port path; auto-detected when unset.
pub const ENV_PORT: &str = "SCALE_BRIDGE_PORT";
/// Serial baud rate.
pub const ENV_BAUD: &str = "SCALE_BRIDGE_BAUD";
/// WebSocket listen address, e.g. `0.0.0.0:8765`.
pub const ENV_WS_ADDR: &str = "SCALE_BRIDGE_WS_ADDR";
/// Heartbeat timeout in milliseconds.
pub const ENV_HEARTBEAT_MS: &str = "SCALE_BRIDGE_HEARTBEAT_MS";
/// Failed connects tolerated before a hardware reset.
pub const ENV_RESET_THRESHOLD: &str = "SCALE_BRIDGE_RESET_THRESHOLD";
/// Weight request interval in milliseconds.
pub const ENV_REQUEST_INTERVAL_MS: &str = "SCALE_BRIDGE_REQUEST_INTERVAL_MS";
/// Wait after a failed connect in milliseconds.
pub const ENV_RETRY_DELAY_MS: &str = "SCALE_BRIDGE_RETRY_DELAY_MS";

/// Configuration for a whole bridge.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub supervisor: SupervisorConfig,
    pub scheduler: SchedulerConfig,
    pub hub: HubConfig,
    pub server: ServerConfig,
}

impl BridgeConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable
    /// name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup(ENV_PORT).filter(|port| !port.trim().is_empty()) {
            config.serial.port = Some(port.trim().to_owned());
        }
        if let Some(baud) = parse_var::<u32>(&lookup, ENV_BAUD)? {
            config.serial = config.serial.baud_rate(baud);
        }
        if let Some(addr) = parse_var::<SocketAddr>(&lookup, ENV_WS_ADDR)? {
            config.server = config.server.bind_addr(addr);
        }
        if let Some(timeout) = parse_millis(&lookup, ENV_HEARTBEAT_MS)? {
            config.supervisor = config.supervisor.heartbeat_timeout(timeout);
        }
        if let Some(threshold) = parse_var::<u32>(&lookup, ENV_RESET_THRESHOLD)? {
            config.supervisor = config.supervisor.reset_threshold(threshold);
        }
        if let Some(interval) = parse_millis(&lookup, ENV_REQUEST_INTERVAL_MS)? {
            config.scheduler = config.scheduler.request_interval(interval);
        }
        if let Some(delay) = parse_millis(&lookup, ENV_RETRY_DELAY_MS)? {
            config.scheduler = config.scheduler.retry_delay(delay);
        }

        Ok(config)
    }

    /// Sets the serial configuration.
    #[must_use]
    pub fn serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Sets the supervisor configuration.
    #[must_use]
    pub fn supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the hub configuration.
    #[must_use]
    pub fn hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Sets the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| Error::Config {
            message: format!("{key}={raw:?}: {e}"),
        })
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>> {
    Ok(parse_var::<u64>(lookup, key)?.map(Duration::from_millis))
}
