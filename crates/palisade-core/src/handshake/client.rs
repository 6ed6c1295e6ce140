//! Client side of the quarantine handshake.

use palisade_proto::{NodeId, Payload, PayloadTag, Properties};

use super::{HandshakeAction, Promotion, optional_properties};
use crate::error::HandshakeError;

/// Client conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Created, name and mac not yet sent
    Init,
    /// Waiting for a challenge or the no-challenge marker
    AwaitChallenge,
    /// Challenge handed to the credential prompt
    AwaitCredentials,
    /// Response sent, waiting for the error-or-null verdict
    AwaitLoginError,
    /// Waiting for `[assigned name, server name]`
    AwaitIdentityNames,
    /// Waiting for `[observed address, server address]`
    AwaitAddresses,
    /// Handshake complete
    Promoted,
    /// Handshake failed or was abandoned
    Terminated,
}

impl ClientState {
    /// State name for diagnostics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::AwaitChallenge => "AwaitChallenge",
            Self::AwaitCredentials => "AwaitCredentials",
            Self::AwaitLoginError => "AwaitLoginError",
            Self::AwaitIdentityNames => "AwaitIdentityNames",
            Self::AwaitAddresses => "AwaitAddresses",
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

/// Client handshake state machine.
///
/// ```text
/// Init ─start─> AwaitChallenge ─null─────────────────> AwaitLoginError
///                     │                                   │    │
///                     └─map─> AwaitCredentials ─respond───┘    │ text: ack + close
///                                                              │ null
///                        Promoted <─ AwaitAddresses <─ AwaitIdentityNames
/// ```
#[derive(Debug, Clone)]
pub struct ClientConversation {
    state: ClientState,
    name: String,
    mac: String,
    assigned_name: Option<String>,
    server_name: Option<String>,
    login_error: Option<String>,
}

impl ClientConversation {
    /// Create a conversation that will ask to be known as `name`
    pub fn new(name: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            state: ClientState::Init,
            name: name.into(),
            mac: mac.into(),
            assigned_name: None,
            server_name: None,
            login_error: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Rejection message received from the server, if the login failed
    #[must_use]
    pub fn login_error(&self) -> Option<&str> {
        self.login_error.as_deref()
    }

    /// Open the conversation: send the requested name and the mac.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless called exactly once, first.
    pub fn start(&mut self) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if self.state != ClientState::Init {
            return Err(self.invalid("start"));
        }

        self.state = ClientState::AwaitChallenge;
        Ok(vec![
            HandshakeAction::Send(Payload::text(self.name.clone())),
            HandshakeAction::Send(Payload::text(self.mac.clone())),
        ])
    }

    /// Feed a payload received from the server.
    ///
    /// # Errors
    ///
    /// Returns the reason the conversation terminated. The state is
    /// `Terminated` afterwards.
    pub fn on_message(&mut self, payload: Payload) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let result = self.step(payload);
        if result.is_err() {
            self.state = ClientState::Terminated;
        }
        result
    }

    /// Deliver the credential prompt's answer. `None` abandons the login.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no challenge is outstanding, `Cancelled` if
    /// `response` is `None`.
    pub fn respond(
        &mut self,
        response: Option<Properties>,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if self.state != ClientState::AwaitCredentials {
            let err = self.invalid("respond");
            self.state = ClientState::Terminated;
            return Err(err);
        }

        match response {
            Some(map) => {
                self.state = ClientState::AwaitLoginError;
                Ok(vec![HandshakeAction::Send(Payload::Properties(map))])
            },
            None => {
                self.state = ClientState::Terminated;
                Err(HandshakeError::Cancelled)
            },
        }
    }

    /// Abandon the conversation
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = ClientState::Terminated;
        }
    }

    fn step(&mut self, payload: Payload) -> Result<Vec<HandshakeAction>, HandshakeError> {
        match self.state {
            ClientState::AwaitChallenge => match optional_properties(payload) {
                Ok(None) => {
                    self.state = ClientState::AwaitLoginError;
                    Ok(vec![HandshakeAction::Send(Payload::Null)])
                },
                Ok(Some(challenge)) => {
                    self.state = ClientState::AwaitCredentials;
                    Ok(vec![HandshakeAction::CollectCredentials(challenge)])
                },
                Err(other) => Err(self.unexpected("challenge or null", &other)),
            },

            ClientState::AwaitLoginError => match payload {
                Payload::Null => {
                    self.state = ClientState::AwaitIdentityNames;
                    Ok(vec![])
                },
                Payload::Text(message) => {
                    self.state = ClientState::Terminated;
                    self.login_error = Some(message.clone());
                    Ok(vec![
                        HandshakeAction::Send(Payload::Null),
                        HandshakeAction::Close { reason: HandshakeError::LoginRejected(message) },
                    ])
                },
                other => Err(self.unexpected("error text or null", &other)),
            },

            ClientState::AwaitIdentityNames => match payload {
                Payload::Pair(assigned, server) => {
                    self.state = ClientState::AwaitAddresses;
                    self.assigned_name = Some(assigned);
                    self.server_name = Some(server);
                    Ok(vec![])
                },
                other => Err(self.unexpected("name pair", &other)),
            },

            ClientState::AwaitAddresses => match payload {
                Payload::Addresses(observed, server_address) => {
                    let assigned = self.assigned_name.take().unwrap_or_else(|| self.name.clone());
                    let server_name = self.server_name.take().unwrap_or_default();
                    self.state = ClientState::Promoted;
                    Ok(vec![HandshakeAction::Promote(Promotion::Client {
                        local: NodeId::new(assigned, observed),
                        server: NodeId::new(server_name, server_address),
                    })])
                },
                other => Err(self.unexpected("address pair", &other)),
            },

            ClientState::Init
            | ClientState::AwaitCredentials
            | ClientState::Promoted
            | ClientState::Terminated => Err(self.invalid("receive a message")),
        }
    }

    fn unexpected(&self, expected: &'static str, found: &Payload) -> HandshakeError {
        let found: PayloadTag = found.tag();
        HandshakeError::UnexpectedPayload { state: self.state.as_str(), expected, found }
    }

    fn invalid(&self, operation: &'static str) -> HandshakeError {
        HandshakeError::InvalidState { state: self.state.as_str(), operation }
    }
}
