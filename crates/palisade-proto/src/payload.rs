//! Tagged envelope payloads.
//!
//! One type byte precedes every payload body. The well-known shapes used by
//! the handshake and by plain byte messaging have a direct structured
//! encoding. Everything else travels as schema-less CBOR under
//! [`PayloadTag::Generic`].
//!
//! # Design Rationale
//!
//! The handshake runs on every connection and exchanges a handful of strings,
//! pairs and string maps. Encoding those directly keeps them cheap and avoids
//! a generic object graph on the hot path. The generic variant keeps the
//! layer open to arbitrary application payloads without coupling the
//! transport to their schema.

use std::{collections::BTreeMap, net::SocketAddr};

use bytes::{BufMut, Bytes};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    errors::{ProtocolError, Result},
    wire::{self, Reader},
};

/// Ordered string map used for login challenges and responses
pub type Properties = BTreeMap<String, String>;

/// Payload type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadTag {
    /// No value
    Null = 0x00,
    /// UTF-8 string
    Text = 0x01,
    /// Two strings
    Pair = 0x02,
    /// Two socket addresses
    Addresses = 0x03,
    /// String-to-string map
    Properties = 0x04,
    /// Opaque application bytes
    Bytes = 0x05,
    /// Schema-less CBOR value
    Generic = 0xFF,
}

impl PayloadTag {
    /// Convert to raw byte
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from raw byte
    ///
    /// Returns `None` for bytes outside the fast path. Such payloads are decoded
    /// as generic CBOR.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Null),
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Pair),
            0x03 => Some(Self::Addresses),
            0x04 => Some(Self::Properties),
            0x05 => Some(Self::Bytes),
            0xFF => Some(Self::Generic),
            _ => None,
        }
    }
}

/// Message payload carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Explicit absence of a value (no challenge, no error, acknowledgment)
    Null,
    /// Single string (display name, hardware id, error message)
    Text(String),
    /// Two strings (assigned name and server name)
    Pair(String, String),
    /// Two socket addresses (observed client address and server address)
    Addresses(SocketAddr, SocketAddr),
    /// Challenge or response map
    Properties(Properties),
    /// Raw application bytes
    Bytes(Bytes),
    /// Arbitrary structured value
    Generic(ciborium::Value),
}

impl Payload {
    /// Text payload
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Pair payload
    pub fn pair(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::Pair(first.into(), second.into())
    }

    /// Serialize any serde value into a generic payload
    pub fn generic<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        ciborium::Value::serialized(value)
            .map(Self::Generic)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Deserialize a generic payload into a concrete type
    pub fn to_generic<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Generic(value) => {
                value.deserialized().map_err(|e| ProtocolError::CborDecode(e.to_string()))
            },
            other => Err(ProtocolError::CborDecode(format!(
                "expected generic payload, found {:?}",
                other.tag()
            ))),
        }
    }

    /// Type discriminator for this payload
    #[must_use]
    pub const fn tag(&self) -> PayloadTag {
        match self {
            Self::Null => PayloadTag::Null,
            Self::Text(_) => PayloadTag::Text,
            Self::Pair(..) => PayloadTag::Pair,
            Self::Addresses(..) => PayloadTag::Addresses,
            Self::Properties(_) => PayloadTag::Properties,
            Self::Bytes(_) => PayloadTag::Bytes,
            Self::Generic(_) => PayloadTag::Generic,
        }
    }

    /// True for [`Payload::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Encode tag and body
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u8(self.tag().to_u8());

        match self {
            Self::Null => {},
            Self::Text(value) => wire::put_string(dst, value),
            Self::Pair(first, second) => {
                wire::put_string(dst, first);
                wire::put_string(dst, second);
            },
            Self::Addresses(first, second) => {
                wire::put_address(dst, first);
                wire::put_address(dst, second);
            },
            Self::Properties(map) => {
                #[allow(clippy::cast_possible_truncation)]
                dst.put_u32(map.len() as u32);
                for (key, value) in map {
                    wire::put_string(dst, key);
                    wire::put_string(dst, value);
                }
            },
            Self::Bytes(bytes) => wire::put_blob(dst, bytes),
            Self::Generic(value) => {
                ciborium::ser::into_writer(value, dst.writer())
                    .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
            },
        }

        Ok(())
    }

    /// Decode tag and body.
    ///
    /// A generic body must be exactly one CBOR value and consumes the rest of
    /// the reader.
    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let tag = reader.u8()?;

        let payload = match PayloadTag::from_u8(tag) {
            Some(PayloadTag::Null) => Self::Null,
            Some(PayloadTag::Text) => Self::Text(reader.string()?),
            Some(PayloadTag::Pair) => Self::Pair(reader.string()?, reader.string()?),
            Some(PayloadTag::Addresses) => Self::Addresses(reader.address()?, reader.address()?),
            Some(PayloadTag::Properties) => {
                let count = reader.u32()?;
                let mut map = Properties::new();
                for _ in 0..count {
                    let key = reader.string()?;
                    let value = reader.string()?;
                    if map.contains_key(&key) {
                        return Err(ProtocolError::DuplicateKey(key));
                    }
                    map.insert(key, value);
                }
                Self::Properties(map)
            },
            Some(PayloadTag::Bytes) => Self::Bytes(Bytes::copy_from_slice(reader.blob()?)),
            Some(PayloadTag::Generic) | None => {
                let mut body = reader.rest();
                let value = ciborium::de::from_reader(&mut body)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;
                if !body.is_empty() {
                    return Err(ProtocolError::TrailingBytes(body.len()));
                }
                Self::Generic(value)
            },
        };

        Ok(payload)
    }
}

impl From<Properties> for Payload {
    fn from(map: Properties) -> Self {
        Self::Properties(map)
    }
}

impl From<Option<Properties>> for Payload {
    fn from(map: Option<Properties>) -> Self {
        map.map_or(Self::Null, Self::Properties)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn round_trip(payload: &Payload) -> Payload {
        let mut buf = Vec::new();
        payload.encode(&mut buf).unwrap();
        let mut reader = Reader::new(&buf);
        let decoded = Payload::decode(&mut reader).unwrap();
        reader.finish().unwrap();
        decoded
    }

    #[test]
    fn fast_path_shapes_round_trip() {
        let challenge: Properties =
            [("nonce".to_string(), "abc".to_string()), ("salt".to_string(), "x".to_string())]
                .into_iter()
                .collect();

        let payloads = [
            Payload::Null,
            Payload::text("alice"),
            Payload::pair("alice (1)", "server1"),
            Payload::Addresses("10.0.0.2:5000".parse().unwrap(), "10.0.0.1:3300".parse().unwrap()),
            Payload::Properties(challenge),
            Payload::Bytes(Bytes::from_static(b"\x00\x01\x02")),
        ];

        for payload in &payloads {
            assert_eq!(&round_trip(payload), payload);
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Move {
        unit: String,
        from: u32,
        to: u32,
    }

    #[test]
    fn generic_payload_round_trip() {
        let mv = Move { unit: "infantry".to_string(), from: 3, to: 4 };
        let payload = Payload::generic(&mv).unwrap();
        assert_eq!(payload.tag(), PayloadTag::Generic);

        let decoded = round_trip(&payload);
        assert_eq!(decoded.to_generic::<Move>().unwrap(), mv);
    }

    #[test]
    fn unknown_tag_falls_back_to_cbor() {
        let mut buf = vec![0x42];
        ciborium::ser::into_writer(&ciborium::Value::Text("hi".to_string()), &mut buf).unwrap();

        let decoded = Payload::decode(&mut Reader::new(&buf)).unwrap();
        assert_eq!(decoded, Payload::Generic(ciborium::Value::Text("hi".to_string())));
    }

    #[test]
    fn garbage_generic_body_is_decode_error() {
        let buf = [0xFF, 0xFF, 0xFF];
        let result = Payload::decode(&mut Reader::new(&buf));
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn bytes_after_generic_value_are_rejected() {
        let mut buf = vec![PayloadTag::Generic.to_u8()];
        ciborium::ser::into_writer(&ciborium::Value::Integer(7.into()), &mut buf).unwrap();
        buf.extend_from_slice(&[0x01, 0x02]);

        let result = Payload::decode(&mut Reader::new(&buf));
        assert_eq!(result, Err(ProtocolError::TrailingBytes(2)));
    }

    #[test]
    fn duplicate_property_keys_are_rejected() {
        let mut buf = vec![PayloadTag::Properties.to_u8()];
        buf.extend_from_slice(&2u32.to_be_bytes());
        for value in ["a", "b"] {
            wire::put_string(&mut buf, "nonce");
            wire::put_string(&mut buf, value);
        }

        let result = Payload::decode(&mut Reader::new(&buf));
        assert_eq!(result, Err(ProtocolError::DuplicateKey("nonce".to_string())));
    }

    #[test]
    fn text_is_not_generic() {
        let result = Payload::text("x").to_generic::<String>();
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn optional_properties_convert_to_null() {
        assert_eq!(Payload::from(None::<Properties>), Payload::Null);
    }

    #[test]
    fn tag_round_trip() {
        for tag in [
            PayloadTag::Null,
            PayloadTag::Text,
            PayloadTag::Pair,
            PayloadTag::Addresses,
            PayloadTag::Properties,
            PayloadTag::Bytes,
            PayloadTag::Generic,
        ] {
            assert_eq!(PayloadTag::from_u8(tag.to_u8()), Some(tag));
        }
        assert_eq!(PayloadTag::from_u8(0x42), None);
    }
}
