//! Server side of the quarantine handshake.

use std::{fmt, net::SocketAddr, sync::Arc};

use palisade_proto::{NodeId, Payload, Properties};
use tracing::{debug, info};

use super::{HandshakeAction, Promotion, optional_properties};
use crate::{
    error::HandshakeError,
    policy::{LoginAttempt, LoginAudit, LoginValidator, NameAllocator},
};

/// Server conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the requested display name
    ReadName,
    /// Waiting for the hardware identifier
    ReadMac,
    /// Challenge sent, waiting for the response
    Challenge,
    /// Rejection sent, waiting for the client's acknowledgment
    AckError,
    /// Handshake complete
    Promoted,
    /// Handshake failed or was abandoned
    Terminated,
}

impl ServerState {
    /// State name for diagnostics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadName => "ReadName",
            Self::ReadMac => "ReadMac",
            Self::Challenge => "Challenge",
            Self::AckError => "AckError",
            Self::Promoted => "Promoted",
            Self::Terminated => "Terminated",
        }
    }

    /// True once promoted or terminated
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Promoted | Self::Terminated)
    }
}

/// Server handshake state machine, one per accepted connection.
pub struct ServerConversation {
    state: ServerState,
    local: NodeId,
    remote: SocketAddr,
    names: Arc<dyn NameAllocator>,
    validator: Option<Arc<dyn LoginValidator>>,
    audit: Option<Arc<dyn LoginAudit>>,
    name: String,
    mac: String,
    challenge: Option<Properties>,
    rejection: Option<String>,
}

impl ServerConversation {
    /// Create a conversation for a connection from `remote`.
    ///
    /// `local` is the server's own name and advertised address.
    pub fn new(local: NodeId, remote: SocketAddr, names: Arc<dyn NameAllocator>) -> Self {
        Self {
            state: ServerState::ReadName,
            local,
            remote,
            names,
            validator: None,
            audit: None,
            name: String::new(),
            mac: String::new(),
            challenge: None,
            rejection: None,
        }
    }

    /// Use a login policy. Without one every login is accepted unchallenged.
    #[must_use]
    pub fn with_validator(mut self, validator: Option<Arc<dyn LoginValidator>>) -> Self {
        self.validator = validator;
        self
    }

    /// Record successful logins
    #[must_use]
    pub fn with_audit(mut self, audit: Option<Arc<dyn LoginAudit>>) -> Self {
        self.audit = audit;
        self
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Remote socket address as observed on accept
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Feed a payload received from the client.
    ///
    /// # Errors
    ///
    /// Returns the reason the conversation terminated. The state is
    /// `Terminated` afterwards.
    pub fn on_message(&mut self, payload: Payload) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let result = self.step(payload);
        if result.is_err() {
            self.state = ServerState::Terminated;
        }
        result
    }

    /// Abandon the conversation
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = ServerState::Terminated;
        }
    }

    fn step(&mut self, payload: Payload) -> Result<Vec<HandshakeAction>, HandshakeError> {
        match (self.state, payload) {
            (ServerState::ReadName, Payload::Text(name)) => {
                self.name = name;
                self.state = ServerState::ReadMac;
                Ok(vec![])
            },

            (ServerState::ReadMac, Payload::Text(mac)) => {
                self.mac = mac;
                self.challenge = self
                    .validator
                    .as_ref()
                    .map(|validator| validator.challenge(&self.name, self.remote))
                    .filter(|challenge| !challenge.is_empty());
                self.state = ServerState::Challenge;
                Ok(vec![HandshakeAction::Send(Payload::from(self.challenge.clone()))])
            },

            (ServerState::Challenge, payload) => {
                let response = optional_properties(payload).map_err(|other| {
                    HandshakeError::UnexpectedPayload {
                        state: self.state.as_str(),
                        expected: "response or null",
                        found: other.tag(),
                    }
                })?;
                self.verify(response)
            },

            (ServerState::AckError, _) => {
                self.state = ServerState::Terminated;
                let message = self.rejection.take().unwrap_or_default();
                Ok(vec![HandshakeAction::Close { reason: HandshakeError::LoginRejected(message) }])
            },

            (state @ (ServerState::ReadName | ServerState::ReadMac), other) => {
                Err(HandshakeError::UnexpectedPayload {
                    state: state.as_str(),
                    expected: "text",
                    found: other.tag(),
                })
            },

            (state @ (ServerState::Promoted | ServerState::Terminated), _) => {
                Err(HandshakeError::InvalidState {
                    state: state.as_str(),
                    operation: "receive a message",
                })
            },
        }
    }

    fn verify(
        &mut self,
        response: Option<Properties>,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let rejection = self.validator.as_ref().and_then(|validator| {
            validator.verify(&LoginAttempt {
                name: &self.name,
                mac: &self.mac,
                remote: self.remote,
                challenge: self.challenge.as_ref(),
                response: response.as_ref(),
            })
        });

        if let Some(message) = rejection {
            debug!(peer = %self.remote, name = %self.name, %message, "login rejected");
            self.state = ServerState::AckError;
            self.rejection = Some(message.clone());
            return Ok(vec![HandshakeAction::Send(Payload::Text(message))]);
        }

        let unique = self.names.unique_name(&self.name);
        if let Some(audit) = &self.audit {
            audit.logged_in(&unique, self.remote, &self.mac);
        }
        info!(peer = %self.remote, name = %unique, "login accepted");

        self.state = ServerState::Promoted;
        Ok(vec![
            HandshakeAction::Send(Payload::Null),
            HandshakeAction::Send(Payload::pair(unique.clone(), self.local.name())),
            HandshakeAction::Send(Payload::Addresses(self.remote, self.local.address())),
            HandshakeAction::Promote(Promotion::Server {
                node: NodeId::new(unique, self.remote),
                mac: std::mem::take(&mut self.mac),
            }),
        ])
    }
}

impl fmt::Debug for ServerConversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConversation")
            .field("state", &self.state)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("name", &self.name)
            .field("challenged", &self.challenge.is_some())
            .finish_non_exhaustive()
    }
}
