//! JSON messages exchanged with observers.

use serde::{Deserialize, Serialize};

use crate::scheduler::DeviceCommand;
use crate::types::{StatusSnapshot, WeightReading};

/// Server to client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Connection state, with the last known reading.
    Status {
        connected: bool,
        weight: Option<WeightReading>,
    },
    /// A freshly parsed reading.
    Weight { data: WeightReading },
    /// Acknowledges a client command.
    Ack { command: ClientCommand },
}

impl From<StatusSnapshot> for ServerMessage {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self::Status {
            connected: snapshot.connected,
            weight: snapshot.current,
        }
    }
}

/// Client to server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub command: ClientCommand,
}

/// Commands a client may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientCommand {
    Tare,
    Zero,
    Read,
}

impl ClientCommand {
    /// Returns the device command this maps to.
    #[must_use]
    pub const fn device_command(self) -> DeviceCommand {
        match self {
            Self::Tare => DeviceCommand::Tare,
            Self::Zero => DeviceCommand::Zero,
            Self::Read => DeviceCommand::RequestWeight,
        }
    }
}
