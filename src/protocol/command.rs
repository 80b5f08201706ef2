//! Commands understood by the scale.
//!
//! Every command is `ESC` followed by a single letter and a CR-LF
//! terminator. Zeroing has no single portable command across scale
//! models, so it is sent as a sequence.

use std::time::Duration;

use bytes::Bytes;

/// Escape byte that introduces every command.
pub const ESC: u8 = 0x1B;

/// Pause between the frames of a multi-frame command.
pub const INTER_FRAME_DELAY: Duration = Duration::from_millis(100);

const PRINT: &[u8] = b"\x1bP\r\n";
const TARE: &[u8] = b"\x1bT\r\n";
const ZERO: &[u8] = b"\x1bZ\r\n";
const ZERO_ALT: &[u8] = b"\x1b0\r\n";

/// Commands sent to the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleCommand {
    /// Request the current weight (`ESC P`).
    RequestWeight,
    /// Tare the scale (`ESC T`).
    Tare,
    /// Zero the scale (`ESC Z`, `ESC 0`, `ESC T`, best-effort).
    Zero,
}

impl ScaleCommand {
    /// Returns the frames to write, in order.
    ///
    /// Frames after the first should be separated by [`INTER_FRAME_DELAY`].
    #[must_use]
    pub fn frames(self) -> Vec<Bytes> {
        match self {
            Self::RequestWeight => vec![Bytes::from_static(PRINT)],
            Self::Tare => vec![Bytes::from_static(TARE)],
            // Some models only accept tare on an empty pan as zero.
            Self::Zero => vec![
                Bytes::from_static(ZERO),
                Bytes::from_static(ZERO_ALT),
                Bytes::from_static(TARE),
            ],
        }
    }

    /// Returns the command name as used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestWeight => "request_weight",
            Self::Tare => "tare",
            Self::Zero => "zero",
        }
    }
}
