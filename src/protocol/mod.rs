//! Protocol definitions for scale communication.
//!
//! This module contains the device-facing protocol:
//! - Line decoding of the byte stream
//! - Outbound command encoding
//! - Weight line parsing

pub mod codec;
pub mod command;
pub mod parser;

pub use codec::{LINE_TERMINATOR, LineCodec, Lines, MAX_LINE_LENGTH};
pub use command::{ESC, INTER_FRAME_DELAY, ScaleCommand};
pub use parser::parse_weight;
