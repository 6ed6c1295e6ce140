//! Wire format for the Palisade transport.
//!
//! Every message on a connection travels as one frame: a 4-byte length prefix
//! (XORed with [`LengthPrefix::MAGIC`]) followed by that many payload bytes.
//! The payload bytes of a frame are always exactly one serialized
//! [`Envelope`]: destination marker, source marker, payload type tag and the
//! payload body.
//!
//! # Layout
//!
//! ```text
//! frame    := [len ^ MAGIC: u32 BE] [envelope: len bytes]
//! envelope := dest_marker [identity]? src_marker [identity]? tag body
//! ```
//!
//! Identities are omitted whenever they are implied by the connection the
//! frame travels on, so steady-state traffic between two peers carries no
//! identity bytes at all.
//!
//! # Payloads
//!
//! A small closed set of message shapes (strings, pairs, property maps, raw
//! bytes) is encoded through a direct structured path. Anything else is
//! carried as schema-less CBOR under the generic tag.
//!
//! # Security
//!
//! The length obfuscation is not a security mechanism. Frames larger than
//! [`MAX_FRAME_SIZE`] are rejected on both encode and decode, and a corrupt
//! length prefix is never resynchronized: the connection must be dropped.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod frame;
pub mod identity;
pub mod payload;
pub mod prefix;
mod wire;

pub use envelope::{Envelope, Marker, Perspective};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameReader, MAX_FRAME_SIZE};
pub use identity::NodeId;
pub use payload::{Payload, PayloadTag, Properties};
pub use prefix::LengthPrefix;
