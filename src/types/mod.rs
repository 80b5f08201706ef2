//! Data types for the scale bridge.
//!
//! This module contains the core data structures:
//! - Weight readings
//! - Connection, heartbeat and recovery state

pub mod reading;
pub mod state;

pub use reading::{DEFAULT_UNIT, WeightReading};
pub use state::{ConnectionState, HeartbeatState, RecoveryCounter, StatusSnapshot};
