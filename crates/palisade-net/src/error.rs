//! Runtime error types.
//!
//! [`ConnectionError`] describes why a single connection was torn down. It is
//! produced once per connection by the error reporter and handed to the
//! switchboard handler. [`MessengerError`] is what the public messenger APIs
//! return.

use std::{io, net::SocketAddr};

use palisade_core::HandshakeError;
use palisade_proto::{NodeId, ProtocolError};
use thiserror::Error;

/// Why a connection was closed
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Socket read or write failed
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream
    #[error("connection closed by peer")]
    Closed,

    /// Corrupt framing or an undecodable envelope
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake failed, was rejected or was abandoned
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Trusted peer sent an envelope claiming another source
    #[error("peer {registered} sent an envelope as {claimed}")]
    Spoofed {
        /// Identity registered for the connection
        registered: NodeId,
        /// Identity the envelope claimed
        claimed: NodeId,
    },

    /// Closed locally
    #[error("connection removed")]
    Removed,

    /// The switchboard shut down
    #[error("switchboard shut down")]
    Shutdown,
}

impl ConnectionError {
    /// True when the teardown was a login rejection, which is closed
    /// gracefully
    #[must_use]
    pub fn is_login_rejection(&self) -> bool {
        matches!(self, Self::Handshake(HandshakeError::LoginRejected(_)))
    }
}

/// Errors returned by the messenger APIs
#[derive(Error, Debug)]
pub enum MessengerError {
    /// Listener could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address
        address: SocketAddr,
        /// Underlying error
        source: io::Error,
    },

    /// Server could not be reached
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Server address
        address: SocketAddr,
        /// Underlying error
        source: io::Error,
    },

    /// The server rejected the login with this message
    #[error("login rejected: {0}")]
    LoginRejected(String),

    /// The connection failed before or after login
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Envelope could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server's own node cannot be removed
    #[error("cannot remove the local node")]
    RemoveSelf,

    /// The messenger has been shut down
    #[error("messenger is shut down")]
    Shutdown,
}

impl MessengerError {
    /// Map a connection lost before promotion to the caller-facing error
    pub fn from_login_failure(cause: ConnectionError) -> Self {
        if let ConnectionError::Handshake(err) = &cause {
            if let Some(message) = err.login_message() {
                return Self::LoginRejected(message.to_owned());
            }
        }
        Self::Connection(cause)
    }
}
