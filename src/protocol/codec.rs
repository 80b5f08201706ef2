//! Line decoding for the scale's serial protocol.
//!
//! The scale answers with ASCII text lines:
//! ```text
//! ┌────────────────────────────┬──────┬──────┐
//! │  text, e.g. "+  123.4 g"   │  CR  │  LF  │
//! └────────────────────────────┴──────┴──────┘
//! ```
//! Some transports prepend status bytes to every chunk they hand out
//! (FTDI bridges read over raw USB prepend two modem-status bytes).
//! Those are stripped per chunk before the payload is buffered.

use bytes::{Buf, BytesMut};

use crate::error::CodecError;

/// Line terminator sent by the scale.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Longest line, terminator excluded, that is decoded. Longer lines are
/// dropped whole.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Line decoder that handles partial device writes.
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: BytesMut,
    prefix_len: usize,
    // Dropping an overlong line until its terminator arrives
    discarding: bool,
    // Last discarded byte was CR, so a leading LF ends the line
    pending_cr: bool,
}

impl LineCodec {
    /// Creates a codec for transports that deliver plain payload bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix_len(0)
    }

    /// Creates a codec that strips `prefix_len` framing bytes from every chunk.
    #[must_use]
    pub fn with_prefix_len(prefix_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            prefix_len,
            discarding: false,
            pending_cr: false,
        }
    }

    /// Feeds a raw chunk as returned by one transport read.
    ///
    /// Chunks no longer than the framing prefix carry no payload and are
    /// ignored. When the unterminated line grows past [`MAX_LINE_LENGTH`],
    /// it is dropped along with everything up to its terminator, and an
    /// error is returned.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), CodecError> {
        if chunk.len() <= self.prefix_len {
            return Ok(());
        }
        let mut payload = &chunk[self.prefix_len..];

        if self.discarding {
            match self.skip_discarded(payload) {
                Some(rest) => payload = rest,
                None => return Ok(()),
            }
        }

        self.buffer.extend_from_slice(payload);
        self.check_overflow()
    }

    /// Splits off the next complete, non-empty line.
    ///
    /// Returns `None` once no terminator remains in the buffer; the
    /// unterminated remainder stays buffered for the next chunk.
    /// Blank lines and lines longer than [`MAX_LINE_LENGTH`] are skipped.
    pub fn drain_line(&mut self) -> Option<String> {
        while let Some(pos) = find_terminator(&self.buffer) {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(LINE_TERMINATOR.len());

            if line.len() > MAX_LINE_LENGTH {
                tracing::warn!("dropping {}-byte line", line.len());
                continue;
            }

            let text = decode_ascii_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_owned());
            }
        }
        None
    }

    /// Drops bytes of an overlong line. Returns what follows its
    /// terminator, or `None` if the terminator has not arrived yet.
    fn skip_discarded<'a>(&mut self, payload: &'a [u8]) -> Option<&'a [u8]> {
        let rest = if self.pending_cr && payload.first() == Some(&b'\n') {
            &payload[1..]
        } else if let Some(pos) = find_terminator(payload) {
            &payload[pos + LINE_TERMINATOR.len()..]
        } else {
            self.pending_cr = payload.last() == Some(&b'\r');
            return None;
        };

        self.discarding = false;
        self.pending_cr = false;
        Some(rest)
    }

    /// Starts discarding when the unterminated tail is too long.
    fn check_overflow(&mut self) -> Result<(), CodecError> {
        let tail_start =
            rfind_terminator(&self.buffer).map_or(0, |pos| pos + LINE_TERMINATOR.len());
        let tail = &self.buffer[tail_start..];
        // A trailing CR may still become part of the terminator
        let pending_cr = tail.last() == Some(&b'\r');
        let size = tail.len() - usize::from(pending_cr);
        if size <= MAX_LINE_LENGTH {
            return Ok(());
        }

        self.buffer.truncate(tail_start);
        self.discarding = true;
        self.pending_cr = pending_cr;
        Err(CodecError::LineTooLong {
            size,
            max: MAX_LINE_LENGTH,
        })
    }

    /// Returns an iterator draining every complete line currently buffered.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { codec: self }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the per-chunk framing prefix length.
    #[must_use]
    pub const fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
        self.pending_cr = false;
    }
}

/// Iterator over the complete lines buffered in a [`LineCodec`].
///
/// Ends when the buffer holds no more terminators. Feeding more data and
/// calling [`LineCodec::lines`] again resumes where it stopped.
pub struct Lines<'a> {
    codec: &'a mut LineCodec,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.codec.drain_line()
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_TERMINATOR.len())
        .position(|w| w == LINE_TERMINATOR)
}

fn rfind_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_TERMINATOR.len())
        .rposition(|w| w == LINE_TERMINATOR)
}

/// Decodes ASCII, replacing every non-ASCII byte with U+FFFD.
fn decode_ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii() {
                char::from(b)
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect()
}
