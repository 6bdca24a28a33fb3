//! Wire-level error kinds.

use thiserror::Error;

/// Failure while decoding or encoding a frame.
#[derive(Debug, Error)]
pub enum WireError {
    /// The 2-byte magic at the start of a header did not match `0x5243`.
    #[error("bad magic {found:#06x}, expected {expected:#06x}", expected = super::header::MAGIC)]
    BadMagic {
        /// The value actually read.
        found: u16,
    },

    /// A message arrived with a msgid whose direction bit contradicts the
    /// role of the reader (e.g. a server-origin msgid read by the server).
    #[error("msgid {msgid:#06x} violates direction (server-origin bit set)")]
    WrongDirection {
        /// The offending msgid.
        msgid: u16,
    },

    /// `bodyLen` exceeded [`super::MAX_BODY_LEN`].
    #[error("body length {len} exceeds maximum {max}")]
    BodyTooLarge {
        /// Declared body length.
        len: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The body was shorter than the fixed prefix required to decode it.
    ///
    /// Per the wire contract this is not fatal to the connection: the
    /// caller should skip the frame and keep reading.
    #[error("body of {len} bytes is shorter than the {needed}-byte prefix for msgid {msgid:#06x}")]
    Truncated {
        /// The offending msgid.
        msgid: u16,
        /// Bytes actually present.
        len: usize,
        /// Bytes required to decode the fixed prefix.
        needed: usize,
    },

    /// Underlying I/O failure while reading or writing a frame.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True for errors that should close the connection outright, as
    /// opposed to [`WireError::Truncated`] which is tolerated.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WireError::Truncated { .. })
    }
}
