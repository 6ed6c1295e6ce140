//! Obfuscated length prefix with zero-copy parsing.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// 4-byte frame length prefix (Big Endian, XORed with [`Self::MAGIC`]).
///
/// The mask keeps the first bytes of a connection from looking like a plain
/// length field to naive traffic inspection. It does not authenticate or
/// protect anything.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LengthPrefix {
    masked: [u8; 4],
}

impl LengthPrefix {
    /// Size of the serialized prefix
    pub const SIZE: usize = 4;

    /// Mask applied to the length before it goes on the wire
    pub const MAGIC: u32 = 0x9B28_AD1F;

    /// Build the prefix for a payload of `length` bytes.
    #[must_use]
    pub fn new(length: u32) -> Self {
        Self { masked: (length ^ Self::MAGIC).to_be_bytes() }
    }

    /// Parse a prefix from the front of `bytes` without copying.
    ///
    /// Only checks that four bytes are present. Use [`Self::validate`] to
    /// check the decoded length.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::Truncated { expected: Self::SIZE, actual: bytes.len() })
            .map(|(prefix, _)| prefix)
    }

    /// Decoded (unmasked) length.
    #[must_use]
    pub fn length(&self) -> u32 {
        u32::from_be_bytes(self.masked) ^ Self::MAGIC
    }

    /// Decoded length, rejected unless it lies in `[1, max]`.
    pub fn validate(&self, max: usize) -> Result<usize> {
        let length = self.length();
        let size = length as usize;
        if size == 0 || size > max {
            return Err(ProtocolError::CorruptFrame { length, max });
        }
        Ok(size)
    }

    /// Serialize to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }
}

impl std::fmt::Debug for LengthPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LengthPrefix")
            .field("masked", &format!("{:#010x}", u32::from_be_bytes(self.masked)))
            .field("length", &self.length())
            .finish()
    }
}
