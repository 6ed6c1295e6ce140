//! Logical node identities.

use std::{fmt, net::SocketAddr};

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    wire::{self, Reader},
};

/// Identity of a logical peer: display name plus the address it is reachable
/// (or was observed) at.
///
/// A `NodeId` is independent of any transport connection. The same identity
/// may be re-established over a new connection after a reconnect.
///
/// Before a connection finishes its handshake the remote side is known only by
/// a *provisional* identity: an empty name and the socket's remote address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    name: String,
    address: SocketAddr,
}

impl NodeId {
    /// Create an identity
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self { name: name.into(), address }
    }

    /// Placeholder identity for a connection that has not been promoted
    pub fn provisional(address: SocketAddr) -> Self {
        Self { name: String::new(), address }
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Socket address
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// True for identities created by [`NodeId::provisional`]
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.name.is_empty()
    }

    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        wire::put_string(dst, &self.name);
        wire::put_address(dst, &self.address);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let name = reader.string()?;
        let address = reader.address()?;
        Ok(Self { name, address })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_provisional() {
            write!(f, "<unnamed>@{}", self.address)
        } else {
            write!(f, "{}@{}", self.name, self.address)
        }
    }
}
