//! Quarantine handshake conversations.
//!
//! Every connection starts quarantined. Its conversation consumes the
//! payloads that arrive on it and decides when (and whether) it becomes
//! trusted.
//!
//! # Message sequence
//!
//! ```text
//!  client                                   server
//!    │── name ──────────────────────────────>│ ReadName
//!    │── mac ───────────────────────────────>│ ReadMac
//!    │<────────────────── challenge or null ─│
//!    │── response or null ──────────────────>│ Challenge
//!    │<──────────────────── error or null ───│
//!    │                                       │
//!    │   on error:                           │
//!    │── ack (null) ────────────────────────>│ AckError
//!    │   both sides terminate                │
//!    │                                       │
//!    │   on success:                         │
//!    │<──────────── [assigned, server name] ─│
//!    │<───────── [observed, server address] ─│
//!    │   both sides promote                  │
//! ```
//!
//! Transitions are strictly forward. Once a conversation reports
//! [`HandshakeAction::Promote`] or [`HandshakeAction::Close`] it is terminal
//! and the runtime discards it.
//!
//! # Errors
//!
//! Every method returns `Result<Vec<HandshakeAction>, HandshakeError>`. An
//! `Err` always means the conversation has terminated; the runtime tears the
//! connection down.

mod client;
mod server;

pub use client::{ClientConversation, ClientState};
use palisade_proto::{NodeId, Payload, Properties};
pub use server::{ServerConversation, ServerState};

use crate::error::HandshakeError;

/// Actions returned by a conversation for the runtime to execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    /// Send this payload to the peer
    Send(Payload),

    /// Ask the user for credentials; answer with
    /// [`ClientConversation::respond`]
    CollectCredentials(Properties),

    /// Move the connection out of quarantine
    Promote(Promotion),

    /// Close the connection
    Close {
        /// Why the conversation ended
        reason: HandshakeError,
    },
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    /// Client side: who we are now and who the server is
    Client {
        /// Our identity as assigned and observed by the server
        local: NodeId,
        /// The server's identity
        server: NodeId,
    },

    /// Server side: who the peer is
    Server {
        /// Peer identity under its de-duplicated name
        node: NodeId,
        /// Hardware identifier the peer presented
        mac: String,
    },
}

impl Promotion {
    /// Identity of the remote end of the connection
    #[must_use]
    pub fn remote(&self) -> &NodeId {
        match self {
            Self::Client { server, .. } => server,
            Self::Server { node, .. } => node,
        }
    }
}

/// Either side of a handshake, as held by the runtime per connection.
#[derive(Debug)]
pub enum Conversation {
    /// Connection we opened
    Client(ClientConversation),
    /// Connection we accepted
    Server(ServerConversation),
}

impl Conversation {
    /// Feed a payload received on the quarantined connection.
    ///
    /// # Errors
    ///
    /// Returns the reason the conversation terminated.
    pub fn on_message(&mut self, payload: Payload) -> Result<Vec<HandshakeAction>, HandshakeError> {
        match self {
            Self::Client(client) => client.on_message(payload),
            Self::Server(server) => server.on_message(payload),
        }
    }

    /// Abandon the conversation (the connection went away)
    pub fn cancel(&mut self) {
        match self {
            Self::Client(client) => client.cancel(),
            Self::Server(server) => server.cancel(),
        }
    }

    /// True once promoted or terminated
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Client(client) => client.state().is_terminal(),
            Self::Server(server) => server.state().is_terminal(),
        }
    }
}

/// Normalize a challenge or response payload: `Null` and an empty map both
/// mean "none".
fn optional_properties(payload: Payload) -> Result<Option<Properties>, Payload> {
    match payload {
        Payload::Null => Ok(None),
        Payload::Properties(map) if map.is_empty() => Ok(None),
        Payload::Properties(map) => Ok(Some(map)),
        other => Err(other),
    }
}
