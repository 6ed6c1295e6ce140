//! Palisade core logic
//!
//! Pure state machine logic for the connection quarantine handshake,
//! completely decoupled from I/O.
//!
//! # Architecture
//!
//! Every new connection is quarantined until a handshake conversation
//! promotes it. The conversations in this crate are deterministic state
//! machines: they consume decoded payloads and return declarative
//! [`HandshakeAction`]s (send this payload, collect credentials, promote,
//! close). A runtime is responsible for executing those actions, which keeps
//! the handshake testable without sockets, threads or clocks.
//!
//! External policy (login validation, name allocation, login auditing and
//! interactive credential collection) is reached through the traits in
//! [`policy`].
//!
//! # Components
//!
//! - [`handshake`]: Client and server quarantine conversations
//! - [`policy`]: Collaborator traits consumed by the conversations
//! - [`naming`]: Display name de-duplication
//! - [`error`]: Handshake error types

pub mod error;
pub mod handshake;
pub mod naming;
pub mod policy;

pub use error::HandshakeError;
pub use handshake::{
    ClientConversation, ClientState, Conversation, HandshakeAction, Promotion,
    ServerConversation, ServerState,
};
pub use policy::{CredentialPrompt, LoginAttempt, LoginAudit, LoginValidator, NameAllocator};
