//! Error types for the handshake state machines.
//!
//! Every error terminates the conversation that produced it. Only
//! [`HandshakeError::LoginRejected`] carries a message meant for a human on
//! the other end of the connection.

use palisade_proto::PayloadTag;
use thiserror::Error;

/// Errors that end a quarantine conversation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Payload shape does not fit the current state
    #[error("unexpected {found:?} payload in state {state}, expected {expected}")]
    UnexpectedPayload {
        /// State the conversation was in
        state: &'static str,
        /// What the state accepts
        expected: &'static str,
        /// What arrived
        found: PayloadTag,
    },

    /// Operation not allowed in the current state
    #[error("invalid state transition: cannot {operation} in state {state}")]
    InvalidState {
        /// State the conversation was in
        state: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// The server refused the login with this message
    #[error("login rejected: {0}")]
    LoginRejected(String),

    /// Credential collection was abandoned or the connection closed under it
    #[error("credential collection cancelled")]
    Cancelled,
}

impl HandshakeError {
    /// Message to surface to the user, if this error carries one
    #[must_use]
    pub fn login_message(&self) -> Option<&str> {
        match self {
            Self::LoginRejected(message) => Some(message),
            _ => None,
        }
    }
}
