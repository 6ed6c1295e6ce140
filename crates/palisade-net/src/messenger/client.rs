//! Client messenger.

use std::sync::{Arc, Mutex, PoisonError};

use palisade_core::{ClientConversation, Conversation, CredentialPrompt, Promotion};
use palisade_proto::{Envelope, NodeId, Payload};
use tokio::sync::oneshot;
use tracing::info;

use crate::{
    config::ClientConfig,
    error::{ConnectionError, MessengerError},
    listener::{ConnectionListener, Listeners, MessageListener, SwitchboardHandler},
    registry::ConnectionId,
    switchboard::Switchboard,
    transport::{TcpTransport, Transport},
};

type Login = oneshot::Sender<Result<(NodeId, NodeId), MessengerError>>;

/// Client-side state shared with the switchboard
struct Session {
    login: Mutex<Option<Login>>,
    server: Mutex<Option<NodeId>>,
    listeners: Listeners,
}

impl Session {
    fn take_login(&self) -> Option<Login> {
        self.login.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl SwitchboardHandler for Session {
    fn promoted(&self, _switchboard: &Switchboard, _id: ConnectionId, promotion: &Promotion) {
        let Promotion::Client { local, server } = promotion else {
            return;
        };
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(server.clone());
        if let Some(login) = self.take_login() {
            let _ = login.send(Ok((local.clone(), server.clone())));
        }
    }

    fn envelope(&self, _switchboard: &Switchboard, _id: ConnectionId, envelope: Envelope) {
        self.listeners.message_received(&envelope.payload, &envelope.from);
    }

    fn connection_lost(&self, _switchboard: &Switchboard, _id: ConnectionId, cause: ConnectionError) {
        if let Some(login) = self.take_login() {
            let _ = login.send(Err(MessengerError::from_login_failure(cause)));
            return;
        }

        let server = self.server.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(server) = server {
            info!(%server, %cause, "disconnected");
            self.listeners.connection_removed(&server);
        }
    }
}

/// Configures a [`ClientMessenger`] before it connects
pub struct ClientBuilder {
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialPrompt>>,
}

impl ClientBuilder {
    /// Answer server challenges with `prompt`. Without one, a challenged
    /// login is abandoned.
    #[must_use]
    pub fn credentials(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.credentials = Some(prompt);
        self
    }

    /// Connect over TCP and log in
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::connect_with`].
    pub async fn connect(self) -> Result<ClientMessenger, MessengerError> {
        self.connect_with(TcpTransport::client()).await
    }

    /// Connect with `transport` and log in.
    ///
    /// Resolves once the handshake promotes the connection.
    ///
    /// # Errors
    ///
    /// - `Connect` if the server cannot be reached
    /// - `LoginRejected` with the server's message if the login is refused
    /// - `Connection` if the connection fails during the handshake
    pub async fn connect_with<T: Transport>(
        self,
        transport: T,
    ) -> Result<ClientMessenger, MessengerError> {
        let Self { config, credentials } = self;
        let address = config.server;
        let link = transport
            .connect(address)
            .await
            .map_err(|source| MessengerError::Connect { address, source })?;

        let (login, outcome) = oneshot::channel();
        let session = Arc::new(Session {
            login: Mutex::new(Some(login)),
            server: Mutex::new(None),
            listeners: Listeners::default(),
        });
        let switchboard = Switchboard::builder(config.switchboard)
            .credentials(credentials)
            .start(session.clone());

        let provisional = NodeId::new(config.name.clone(), link.local);
        let conversation = ClientConversation::new(config.name, config.mac);
        let connection =
            match switchboard.add_connection(link, provisional, Conversation::Client(conversation)) {
                Ok(id) => id,
                Err(err) => {
                    switchboard.shutdown();
                    return Err(err.into());
                },
            };

        let result = outcome.await.unwrap_or(Err(MessengerError::Shutdown));
        match result {
            Ok((local, server)) => {
                info!(%local, %server, "logged in");
                Ok(ClientMessenger { switchboard, session, connection, local, server })
            },
            Err(err) => {
                switchboard.shutdown();
                Err(err)
            },
        }
    }
}

/// Client end of the network: one trusted connection to a server.
///
/// Dropping the messenger shuts it down.
pub struct ClientMessenger {
    switchboard: Switchboard,
    session: Arc<Session>,
    connection: ConnectionId,
    local: NodeId,
    server: NodeId,
}

impl ClientMessenger {
    /// Begin configuring a client
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder { config, credentials: None }
    }

    /// Connect over TCP without a credential prompt
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::connect_with`].
    pub async fn connect(config: ClientConfig) -> Result<Self, MessengerError> {
        Self::builder(config).connect().await
    }

    /// Our node, under the name the server assigned
    #[must_use]
    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    /// The server's node
    #[must_use]
    pub fn server_node(&self) -> &NodeId {
        &self.server
    }

    /// Send a payload to one node through the server. Ignored once
    /// disconnected.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the payload cannot be encoded.
    pub fn send(&self, payload: Payload, to: &NodeId) -> Result<(), MessengerError> {
        let envelope = Envelope::to(to.clone(), self.local.clone(), payload);
        self.switchboard.enqueue(self.connection, &envelope)?;
        Ok(())
    }

    /// Send a payload to every node, the server included
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the payload cannot be encoded.
    pub fn broadcast(&self, payload: Payload) -> Result<(), MessengerError> {
        let envelope = Envelope::broadcast(self.local.clone(), payload);
        self.switchboard.enqueue(self.connection, &envelope)?;
        Ok(())
    }

    /// Receive messages addressed to us or broadcast
    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.session.listeners.add_message(listener);
    }

    /// Be told when the server connection is lost
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.session.listeners.add_connection(listener);
    }

    /// True while the server connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.switchboard.phase(self.connection).is_some()
    }

    /// Close the connection. Idempotent.
    pub fn shutdown(&self) {
        self.switchboard.shutdown();
    }
}

impl Drop for ClientMessenger {
    fn drop(&mut self) {
        self.shutdown();
    }
}
