//! Decoder: the single consumer of the ingress queue.
//!
//! The decoder task is the only place envelopes are decoded and handled, so
//! the order items enter the ingress queue is the order they take effect,
//! across every connection.
//!
//! For each frame it looks the connection up, decodes the envelope with that
//! connection's perspective and either feeds the payload to the connection's
//! handshake conversation (quarantined) or passes the envelope to the
//! handler (trusted). A frame that fails to decode closes only its own
//! connection; the decoder carries on with the next item.

use std::{collections::HashMap, sync::Arc};

use palisade_core::{
    Conversation, CredentialPrompt, HandshakeAction, HandshakeError, Promotion,
};
use palisade_proto::{Envelope, Frame, Properties};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::{
    credentials,
    error::ConnectionError,
    listener::SwitchboardHandler,
    registry::{CloseMode, ConnectionId, Phase},
    switchboard::Switchboard,
};

/// Items on the ingress queue
#[derive(Debug)]
pub(crate) enum Ingress {
    /// A connection was registered; always precedes its frames
    Added { id: ConnectionId, conversation: Conversation },
    /// A complete frame read from a connection
    Frame { id: ConnectionId, frame: Frame },
    /// The read side of a connection failed after its preceding frames
    Failed { id: ConnectionId, cause: ConnectionError },
    /// The credential prompt answered (or gave up)
    Credentials { id: ConnectionId, response: Result<Option<Properties>, HandshakeError> },
    /// A connection was torn down by the error reporter
    Closed { id: ConnectionId, cause: ConnectionError },
    /// Stop the decoder
    Shutdown,
}

pub(crate) struct Decoder {
    switchboard: Switchboard,
    queue: mpsc::UnboundedReceiver<Ingress>,
    handler: Arc<dyn SwitchboardHandler>,
    credentials: Option<Arc<dyn CredentialPrompt>>,
    conversations: HashMap<ConnectionId, Conversation>,
}

impl Decoder {
    pub fn new(
        switchboard: Switchboard,
        queue: mpsc::UnboundedReceiver<Ingress>,
        handler: Arc<dyn SwitchboardHandler>,
        credentials: Option<Arc<dyn CredentialPrompt>>,
    ) -> Self {
        Self { switchboard, queue, handler, credentials, conversations: HashMap::new() }
    }

    pub async fn run(mut self) {
        while let Some(item) = self.queue.recv().await {
            match item {
                Ingress::Added { id, conversation } => self.added(id, conversation),
                Ingress::Frame { id, frame } => self.frame(id, &frame),
                Ingress::Failed { id, cause } => {
                    self.switchboard.report(id, cause, CloseMode::Abort);
                },
                Ingress::Credentials { id, response } => self.credentials(id, response),
                Ingress::Closed { id, cause } => self.closed(id, cause),
                Ingress::Shutdown => break,
            }
        }
        debug!(abandoned = self.conversations.len(), "decoder stopped");
    }

    fn added(&mut self, id: ConnectionId, mut conversation: Conversation) {
        self.handler.connection_ready(&self.switchboard, id);

        let opening = match &mut conversation {
            Conversation::Client(client) => client.start(),
            Conversation::Server(_) => Ok(Vec::new()),
        };
        self.conversations.insert(id, conversation);
        self.execute(id, opening);
    }

    fn frame(&mut self, id: ConnectionId, frame: &Frame) {
        let Some((phase, perspective)) = self.switchboard.registry().view(id) else {
            trace!(connection = %id, "frame for closed connection dropped");
            return;
        };

        let envelope = match Envelope::from_frame(frame, &perspective) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.switchboard.report(id, err.into(), CloseMode::Abort);
                return;
            },
        };

        match phase {
            Phase::Trusted => self.handler.envelope(&self.switchboard, id, envelope),
            Phase::Quarantined => {
                let Some(conversation) = self.conversations.get_mut(&id) else {
                    return;
                };
                let result = conversation.on_message(envelope.payload);
                self.execute(id, result);
            },
        }
    }

    fn credentials(&mut self, id: ConnectionId, response: Result<Option<Properties>, HandshakeError>) {
        let Some(Conversation::Client(client)) = self.conversations.get_mut(&id) else {
            return;
        };
        let result = response.and_then(|response| client.respond(response));
        self.execute(id, result);
    }

    fn closed(&mut self, id: ConnectionId, cause: ConnectionError) {
        if let Some(mut conversation) = self.conversations.remove(&id) {
            conversation.cancel();
        }
        self.handler.connection_lost(&self.switchboard, id, cause);
    }

    fn execute(&mut self, id: ConnectionId, result: Result<Vec<HandshakeAction>, HandshakeError>) {
        let actions = match result {
            Ok(actions) => actions,
            Err(err) => {
                self.conversations.remove(&id);
                self.switchboard.report(id, err.into(), CloseMode::Abort);
                return;
            },
        };

        for action in actions {
            match action {
                HandshakeAction::Send(payload) => {
                    if let Err(err) = self.switchboard.reply(id, payload) {
                        self.conversations.remove(&id);
                        self.switchboard.report(id, err.into(), CloseMode::Abort);
                        return;
                    }
                },
                HandshakeAction::CollectCredentials(challenge) => {
                    let Some(closed) = self.switchboard.registry().closed_gate(id) else {
                        return;
                    };
                    credentials::collect(
                        id,
                        challenge,
                        self.credentials.clone(),
                        closed,
                        self.switchboard.ingress().clone(),
                    );
                },
                HandshakeAction::Promote(promotion) => {
                    self.conversations.remove(&id);
                    self.promote(id, &promotion);
                },
                HandshakeAction::Close { reason } => {
                    self.conversations.remove(&id);
                    let mode = match reason {
                        HandshakeError::LoginRejected(_) => CloseMode::Flush,
                        _ => CloseMode::Abort,
                    };
                    self.switchboard.report(id, reason.into(), mode);
                },
            }
        }
    }

    fn promote(&self, id: ConnectionId, promotion: &Promotion) {
        let local = match promotion {
            Promotion::Client { local, .. } => Some(local.clone()),
            Promotion::Server { .. } => None,
        };
        let remote = promotion.remote().clone();

        if self.switchboard.registry().promote(id, local, remote) {
            info!(connection = %id, peer = %promotion.remote(), "connection trusted");
            self.handler.promoted(&self.switchboard, id, promotion);
        }
    }
}
