//! Length-prefixed frames and incremental frame reassembly.
//!
//! A `Frame` is the transport-layer unit: one length prefix plus the payload
//! bytes of exactly one envelope. This is a pure data holder; envelope
//! semantics live in [`crate::envelope`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    LengthPrefix,
    errors::{ProtocolError, Result},
};

/// Largest payload a single frame may carry (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Complete protocol frame.
///
/// Layout on the wire: `[LengthPrefix: 4 bytes] + [payload: length bytes]`
///
/// # Invariants
///
/// - `0 < payload.len() <= MAX_FRAME_SIZE`. Enforced by [`Frame::new`] and
///   by the decoders, so a `Frame` value is always encodable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Create a frame, rejecting empty and oversized payloads.
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        if payload.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        Ok(Self { payload })
    }

    /// Payload bytes (without the length prefix)
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Always false; frames are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Number of bytes this frame occupies on the wire
    #[must_use]
    pub fn wire_len(&self) -> usize {
        LengthPrefix::SIZE + self.payload.len()
    }

    /// Encode frame into buffer: `[prefix] + [payload]`
    pub fn encode(&self, dst: &mut impl BufMut) {
        #[allow(clippy::cast_possible_truncation)]
        let prefix = LengthPrefix::new(self.payload.len() as u32);
        dst.put_slice(&prefix.to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Decode a single frame from the front of `bytes`.
    ///
    /// Trailing data after the frame is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let size = LengthPrefix::from_bytes(bytes)?.validate(MAX_FRAME_SIZE)?;
        let total = LengthPrefix::SIZE + size;

        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                expected: size,
                actual: bytes.len() - LengthPrefix::SIZE,
            });
        }

        Ok(Self { payload: Bytes::copy_from_slice(&bytes[LengthPrefix::SIZE..total]) })
    }
}

/// Incremental frame reassembly over a growing read buffer.
///
/// Bytes arrive in arbitrary chunks. The reader consumes the length prefix as
/// soon as four bytes are present, then waits until the whole payload is
/// buffered. A partial frame is never returned.
///
/// Once [`FrameReader::decode`] returns an error the stream is desynchronized
/// and the reader must not be used again.
#[derive(Debug, Clone)]
pub struct FrameReader {
    max_frame_size: usize,
    pending: Option<usize>,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Reader accepting frames up to [`MAX_FRAME_SIZE`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_SIZE)
    }

    /// Reader with a stricter frame size limit (clamped to [`MAX_FRAME_SIZE`])
    #[must_use]
    pub fn with_limit(max_frame_size: usize) -> Self {
        Self { max_frame_size: max_frame_size.clamp(1, MAX_FRAME_SIZE), pending: None }
    }

    /// True while a length prefix has been consumed but its payload is
    /// incomplete.
    #[must_use]
    pub fn is_mid_frame(&self) -> bool {
        self.pending.is_some()
    }

    /// Try to take one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let size = match self.pending {
            Some(size) => size,
            None => {
                if src.len() < LengthPrefix::SIZE {
                    return Ok(None);
                }
                let size = LengthPrefix::from_bytes(src)?.validate(self.max_frame_size)?;
                src.advance(LengthPrefix::SIZE);
                self.pending = Some(size);
                size
            },
        };

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        self.pending = None;
        Ok(Some(Frame { payload: src.split_to(size).freeze() }))
    }
}
