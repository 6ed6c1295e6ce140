//! Error types for the Palisade wire format.
//!
//! Framing errors (`FrameTooLarge`, `EmptyFrame`, `CorruptFrame`) leave the
//! byte stream position untrustworthy and are always fatal to the connection.
//! The remaining variants describe a well-formed frame whose envelope could
//! not be decoded.

use thiserror::Error;

/// Protocol-level errors raised while framing or decoding bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Framing errors
    /// Payload exceeds the maximum frame size
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Frames must carry at least one byte
    #[error("empty frame")]
    EmptyFrame,

    /// Length prefix decoded to a value outside `[1, max]`
    #[error("corrupt frame: length prefix decodes to {length}, allowed range is 1..={max}")]
    CorruptFrame {
        /// Length after removing the magic mask
        length: u32,
        /// Maximum allowed length
        max: usize,
    },

    /// Fewer bytes available than the structure requires
    #[error("truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    // Envelope errors
    /// Unknown destination or source marker byte
    #[error("invalid {field} marker: {value:#04x}")]
    InvalidMarker {
        /// Which marker was invalid ("destination" or "source")
        field: &'static str,
        /// Raw marker byte
        value: u8,
    },

    /// String field was not valid UTF-8
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// Unknown socket address family byte
    #[error("invalid address family: {0:#04x}")]
    InvalidAddress(u8),

    /// A properties map repeated a key
    #[error("duplicate properties key: {0:?}")]
    DuplicateKey(String),

    /// Bytes left over after the payload body
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    // CBOR errors (wrapped for testability)
    /// Failed to encode a generic payload as CBOR
    #[error("failed to encode CBOR: {0}")]
    CborEncode(String),

    /// Failed to decode a generic payload from CBOR
    #[error("failed to decode CBOR: {0}")]
    CborDecode(String),
}

impl ProtocolError {
    /// Whether this error means the byte stream can no longer be framed.
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. } | Self::EmptyFrame | Self::CorruptFrame { .. })
    }
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
