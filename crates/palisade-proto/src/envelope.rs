//! Message envelopes and identity compression.
//!
//! An `Envelope` carries a destination (or broadcast), a source and a
//! payload. Identities are written with a one-byte marker so that the common
//! case, a message between the two endpoints of the connection it travels
//! on, costs no identity bytes.
//!
//! # Perspective
//!
//! Markers are interpreted relative to the connection. Both encoding and
//! decoding take the [`Perspective`] of the side doing the work:
//!
//! - Encoding: a destination equal to `remote`, or a source equal to `local`,
//!   is written as [`Marker::Implied`].
//! - Decoding: an implied destination resolves to `local` (the message is for
//!   us), an implied source resolves to `remote` (the peer sent it).
//!
//! The source is never absent: a decoded envelope always names its sender.

use bytes::{BufMut, BytesMut};

use crate::{
    Frame, NodeId, Payload,
    errors::{ProtocolError, Result},
    wire::Reader,
};

/// Identity marker byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Marker {
    /// No identity: broadcast destination
    Absent = 0x00,
    /// The identity implied by the connection
    Implied = 0x01,
    /// Identity encoded inline after the marker
    Inline = 0x02,
}

impl Marker {
    /// Convert from raw byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Absent),
            0x01 => Some(Self::Implied),
            0x02 => Some(Self::Inline),
            _ => None,
        }
    }
}

/// Identities of the two endpoints of one connection, seen from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Perspective {
    /// This side's identity
    pub local: NodeId,
    /// The other side's identity (provisional until the handshake completes)
    pub remote: NodeId,
}

impl Perspective {
    /// Create a perspective
    pub fn new(local: NodeId, remote: NodeId) -> Self {
        Self { local, remote }
    }
}

/// Logical message: destination, source and payload.
///
/// # Invariants
///
/// - `from` is always present.
/// - `to == None` means the message is addressed to everyone.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Destination, `None` for broadcast
    pub to: Option<NodeId>,
    /// Sender
    pub from: NodeId,
    /// Message body
    pub payload: Payload,
}

impl Envelope {
    /// Envelope addressed to a single node
    pub fn to(to: NodeId, from: NodeId, payload: Payload) -> Self {
        Self { to: Some(to), from, payload }
    }

    /// Envelope addressed to everyone
    pub fn broadcast(from: NodeId, payload: Payload) -> Self {
        Self { to: None, from, payload }
    }

    /// True when addressed to everyone
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Encode the envelope for the connection described by `perspective`.
    pub fn encode(&self, perspective: &Perspective, dst: &mut impl BufMut) -> Result<()> {
        match &self.to {
            None => dst.put_u8(Marker::Absent as u8),
            Some(to) if *to == perspective.remote => dst.put_u8(Marker::Implied as u8),
            Some(to) => {
                dst.put_u8(Marker::Inline as u8);
                to.encode(dst);
            },
        }

        if self.from == perspective.local {
            dst.put_u8(Marker::Implied as u8);
        } else {
            dst.put_u8(Marker::Inline as u8);
            self.from.encode(dst);
        }

        self.payload.encode(dst)
    }

    /// Decode an envelope received on the connection described by
    /// `perspective`.
    pub fn decode(bytes: &[u8], perspective: &Perspective) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let to = match Self::marker(&mut reader, "destination")? {
            Marker::Absent => None,
            Marker::Implied => Some(perspective.local.clone()),
            Marker::Inline => Some(NodeId::decode(&mut reader)?),
        };

        let from = match Self::marker(&mut reader, "source")? {
            Marker::Absent => {
                return Err(ProtocolError::InvalidMarker {
                    field: "source",
                    value: Marker::Absent as u8,
                });
            },
            Marker::Implied => perspective.remote.clone(),
            Marker::Inline => NodeId::decode(&mut reader)?,
        };

        let payload = Payload::decode(&mut reader)?;
        reader.finish()?;

        Ok(Self { to, from, payload })
    }

    /// Encode into a frame ready for the write path
    pub fn into_frame(&self, perspective: &Perspective) -> Result<Frame> {
        let mut buf = BytesMut::new();
        self.encode(perspective, &mut buf)?;
        Frame::new(buf.freeze())
    }

    /// Decode from a frame taken off the read path
    pub fn from_frame(frame: &Frame, perspective: &Perspective) -> Result<Self> {
        Self::decode(frame.payload(), perspective)
    }

    fn marker(reader: &mut Reader<'_>, field: &'static str) -> Result<Marker> {
        let value = reader.u8()?;
        Marker::from_u8(value).ok_or(ProtocolError::InvalidMarker { field, value })
    }
}
