//! Primitive field codecs shared by identities, envelopes and payloads.
//!
//! Strings and byte blobs are `u32` BE length-prefixed. Socket addresses are
//! a family byte (4 or 6), the raw octets and a `u16` BE port.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// Bounds-checked cursor over an envelope body.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(ProtocolError::Truncated { expected: n, actual: self.bytes.len() });
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn blob(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let raw = self.blob()?;
        std::str::from_utf8(raw).map(str::to_owned).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub(crate) fn address(&mut self) -> Result<SocketAddr> {
        let ip = match self.u8()? {
            FAMILY_V4 => {
                let raw = self.take(4)?;
                IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
            },
            FAMILY_V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(self.take(16)?);
                IpAddr::V6(Ipv6Addr::from(octets))
            },
            other => return Err(ProtocolError::InvalidAddress(other)),
        };
        let port = self.u16()?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Everything not yet consumed
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.bytes)
    }

    /// Fails if any bytes remain unconsumed
    pub(crate) fn finish(self) -> Result<()> {
        if self.bytes.is_empty() { Ok(()) } else { Err(ProtocolError::TrailingBytes(self.bytes.len())) }
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn put_blob(dst: &mut impl BufMut, bytes: &[u8]) {
    dst.put_u32(bytes.len() as u32);
    dst.put_slice(bytes);
}

pub(crate) fn put_string(dst: &mut impl BufMut, value: &str) {
    put_blob(dst, value.as_bytes());
}

pub(crate) fn put_address(dst: &mut impl BufMut, address: &SocketAddr) {
    match address.ip() {
        IpAddr::V4(ip) => {
            dst.put_u8(FAMILY_V4);
            dst.put_slice(&ip.octets());
        },
        IpAddr::V6(ip) => {
            dst.put_u8(FAMILY_V6);
            dst.put_slice(&ip.octets());
        },
    }
    dst.put_u16(address.port());
}
