//! Control-channel text encodings.
//!
//! FTP sessions start out ASCII and may switch to UTF-8 (`OPTS UTF8 ON`) at
//! any point. The framer decodes with whatever encoding is current at the
//! moment a line completes, and the response sender encodes with whatever is
//! current at write time, so the active encoding lives in a shared atomic
//! cell rather than behind the session lock.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

/// Encodings supported for the control channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextEncoding {
    /// Seven-bit ASCII; undecodable bytes become `?`.
    #[default]
    Ascii,
    /// ISO 8859-1; every byte maps to the code point of the same value.
    Latin1,
    /// UTF-8 with lossy replacement on invalid sequences.
    Utf8,
}

impl TextEncoding {
    /// Decode raw transport bytes into a command line.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
                .collect(),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Encode a response line for the wire.
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Self::Utf8 => text.as_bytes().to_vec(),
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::Latin1,
            2 => Self::Utf8,
            _ => Self::Ascii,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Ascii => 0,
            Self::Latin1 => 1,
            Self::Utf8 => 2,
        }
    }
}

/// Shared, lock-free cell holding a session's current encoding.
///
/// Cloning yields another handle onto the same cell.
#[derive(Clone, Debug)]
pub struct EncodingCell(Arc<AtomicU8>);

impl EncodingCell {
    /// Create a cell starting at `encoding`.
    #[must_use]
    pub fn new(encoding: TextEncoding) -> Self { Self(Arc::new(AtomicU8::new(encoding.tag()))) }

    /// The encoding currently in effect.
    #[must_use]
    pub fn get(&self) -> TextEncoding { TextEncoding::from_tag(self.0.load(Ordering::Relaxed)) }

    /// Switch the session to `encoding`.
    pub fn set(&self, encoding: TextEncoding) { self.0.store(encoding.tag(), Ordering::Relaxed); }
}

impl Default for EncodingCell {
    fn default() -> Self { Self::new(TextEncoding::default()) }
}
