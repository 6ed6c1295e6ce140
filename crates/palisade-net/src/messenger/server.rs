//! Server messenger.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use palisade_core::{
    Conversation, LoginAudit, LoginValidator, NameAllocator, Promotion, ServerConversation,
    naming,
};
use palisade_proto::{Envelope, NodeId, Payload};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    error::{ConnectionError, MessengerError},
    listener::{ConnectionListener, Listeners, MessageListener, SwitchboardHandler},
    registry::{CloseMode, ConnectionId},
    switchboard::Switchboard,
    transport::{TcpTransport, Transport},
};

/// Departed nodes whose hardware identifier stays queryable
const DEPARTED_MACS: usize = 10;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Nodes {
    by_node: HashMap<NodeId, ConnectionId>,
    by_connection: HashMap<ConnectionId, NodeId>,
    macs: HashMap<String, String>,
    departed: VecDeque<(String, String)>,
}

/// Server-side state shared with the switchboard and every conversation
struct Hub {
    node: NodeId,
    accepting: AtomicBool,
    nodes: Mutex<Nodes>,
    listeners: Listeners,
    validator: Option<Arc<dyn LoginValidator>>,
    audit: Option<Arc<dyn LoginAudit>>,
}

impl Hub {
    fn nodes(&self) -> MutexGuard<'_, Nodes> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn node_for(&self, id: ConnectionId) -> Option<NodeId> {
        self.nodes().by_connection.get(&id).cloned()
    }

    fn connection_for(&self, node: &NodeId) -> Option<ConnectionId> {
        self.nodes().by_node.get(node).copied()
    }

    fn forward(&self, switchboard: &Switchboard, id: ConnectionId, envelope: &Envelope) {
        if let Err(err) = switchboard.enqueue(id, envelope) {
            warn!(connection = %id, %err, "forward failed");
        }
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl NameAllocator for Hub {
    fn unique_name(&self, requested: &str) -> String {
        let nodes = self.nodes();
        naming::unique_name(requested, |candidate| {
            same_name(candidate, self.node.name())
                || nodes.by_node.keys().any(|node| same_name(candidate, node.name()))
        })
    }
}

impl SwitchboardHandler for Hub {
    fn promoted(&self, _switchboard: &Switchboard, id: ConnectionId, promotion: &Promotion) {
        let Promotion::Server { node, mac } = promotion else {
            return;
        };

        {
            let mut nodes = self.nodes();
            nodes.by_node.insert(node.clone(), id);
            nodes.by_connection.insert(id, node.clone());
            nodes.macs.insert(node.name().to_string(), mac.clone());
        }

        info!(%node, connection = %id, "node joined");
        self.listeners.connection_added(node);
    }

    fn envelope(&self, switchboard: &Switchboard, id: ConnectionId, envelope: Envelope) {
        let Some(sender) = self.node_for(id) else {
            return;
        };
        if envelope.from != sender {
            let cause = ConnectionError::Spoofed { registered: sender, claimed: envelope.from };
            switchboard.report(id, cause, CloseMode::Abort);
            return;
        }

        match &envelope.to {
            None => {
                for (other, _) in switchboard.trusted() {
                    if other != id {
                        self.forward(switchboard, other, &envelope);
                    }
                }
                self.listeners.message_received(&envelope.payload, &envelope.from);
            },
            Some(to) if *to == self.node => {
                self.listeners.message_received(&envelope.payload, &envelope.from);
            },
            Some(to) => match self.connection_for(to) {
                Some(target) => self.forward(switchboard, target, &envelope),
                None => warn!(from = %envelope.from, %to, "no route to destination, dropped"),
            },
        }
    }

    fn connection_lost(&self, _switchboard: &Switchboard, id: ConnectionId, cause: ConnectionError) {
        let removed = {
            let mut nodes = self.nodes();
            let node = nodes.by_connection.remove(&id);
            if let Some(node) = &node {
                nodes.by_node.remove(node);
                if let Some(mac) = nodes.macs.remove(node.name()) {
                    nodes.departed.push_back((node.name().to_string(), mac));
                    if nodes.departed.len() > DEPARTED_MACS {
                        nodes.departed.pop_front();
                    }
                }
            }
            node
        };

        match removed {
            Some(node) => {
                info!(%node, %cause, "node left");
                self.listeners.connection_removed(&node);
            },
            None => debug!(connection = %id, %cause, "quarantined connection dropped"),
        }
    }
}

/// Configures a [`ServerMessenger`] before it starts listening
pub struct ServerBuilder {
    config: ServerConfig,
    validator: Option<Arc<dyn LoginValidator>>,
    audit: Option<Arc<dyn LoginAudit>>,
}

impl ServerBuilder {
    /// Challenge and verify logins with `validator`
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn LoginValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Record successful logins with `audit`
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn LoginAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Listen on the configured TCP address
    ///
    /// # Errors
    ///
    /// Returns `Bind` if the address cannot be bound.
    pub async fn bind(self) -> Result<ServerMessenger, MessengerError> {
        let address = self.config.bind;
        let transport = TcpTransport::bind(address)
            .await
            .map_err(|source| MessengerError::Bind { address, source })?;
        self.start(transport)
    }

    /// Serve connections accepted by `transport`
    ///
    /// # Errors
    ///
    /// Returns `Bind` if the transport is not listening.
    pub fn start<T: Transport>(self, transport: T) -> Result<ServerMessenger, MessengerError> {
        let Self { config, validator, audit } = self;
        let bound = transport
            .local_addr()
            .map_err(|source| MessengerError::Bind { address: config.bind, source })?;
        let node = NodeId::new(config.name, config.advertised_address.unwrap_or(bound));

        let hub = Arc::new(Hub {
            node: node.clone(),
            accepting: AtomicBool::new(config.accept_connections),
            nodes: Mutex::new(Nodes::default()),
            listeners: Listeners::default(),
            validator,
            audit,
        });
        let switchboard = Switchboard::builder(config.switchboard).start(hub.clone());
        tokio::spawn(accept_loop(transport, switchboard.clone(), Arc::clone(&hub)));

        info!(%node, %bound, "server listening");
        Ok(ServerMessenger { switchboard, hub, bound })
    }
}

async fn accept_loop<T: Transport>(transport: T, switchboard: Switchboard, hub: Arc<Hub>) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = switchboard.shut_down() => break,
            accepted = transport.accept() => accepted,
        };

        let link = match accepted {
            Ok(link) => link,
            Err(err) => {
                warn!(%err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            },
        };

        if !hub.accepting.load(Ordering::Acquire) {
            debug!(peer = %link.remote, "not accepting connections, closed");
            continue;
        }

        let conversation = ServerConversation::new(hub.node.clone(), link.remote, hub.clone())
            .with_validator(hub.validator.clone())
            .with_audit(hub.audit.clone());
        if switchboard
            .add_connection(link, hub.node.clone(), Conversation::Server(conversation))
            .is_err()
        {
            break;
        }
    }
    debug!("accept loop stopped");
}

/// Server end of the network: accepts clients and routes their messages.
///
/// Dropping the messenger shuts it down.
pub struct ServerMessenger {
    switchboard: Switchboard,
    hub: Arc<Hub>,
    bound: SocketAddr,
}

impl ServerMessenger {
    /// Begin configuring a server
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder { config, validator: None, audit: None }
    }

    /// Listen on TCP with default policy: every login accepted unchallenged
    ///
    /// # Errors
    ///
    /// Returns `Bind` if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, MessengerError> {
        Self::builder(config).bind().await
    }

    /// The server's own node
    #[must_use]
    pub fn local_node(&self) -> &NodeId {
        &self.hub.node
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.bound
    }

    /// Send a payload to one node. Unknown nodes are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the payload cannot be encoded.
    pub fn send(&self, payload: Payload, to: &NodeId) -> Result<(), MessengerError> {
        let Some(id) = self.hub.connection_for(to) else {
            debug!(%to, "send to unknown node ignored");
            return Ok(());
        };
        let envelope = Envelope::to(to.clone(), self.hub.node.clone(), payload);
        self.switchboard.enqueue(id, &envelope)?;
        Ok(())
    }

    /// Send a payload to every connected node
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the payload cannot be encoded.
    pub fn broadcast(&self, payload: Payload) -> Result<(), MessengerError> {
        let envelope = Envelope::broadcast(self.hub.node.clone(), payload);
        for (id, _) in self.switchboard.trusted() {
            self.switchboard.enqueue(id, &envelope)?;
        }
        Ok(())
    }

    /// Receive messages addressed to the server or broadcast
    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.hub.listeners.add_message(listener);
    }

    /// Receive node joins and departures
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.hub.listeners.add_connection(listener);
    }

    /// Accept or refuse new connections. Refused sockets are closed
    /// immediately; existing connections are unaffected.
    pub fn set_accept_connections(&self, accept: bool) {
        self.hub.accepting.store(accept, Ordering::Release);
    }

    /// Whether new connections are accepted
    #[must_use]
    pub fn is_accepting_connections(&self) -> bool {
        self.hub.accepting.load(Ordering::Acquire)
    }

    /// Every connected node, excluding the server itself
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.hub.nodes().by_node.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// True if `node` is connected
    #[must_use]
    pub fn is_connected(&self, node: &NodeId) -> bool {
        self.hub.connection_for(node).is_some()
    }

    /// Disconnect a node. Unknown nodes are ignored.
    ///
    /// # Errors
    ///
    /// Returns `RemoveSelf` for the server's own node.
    pub fn remove_connection(&self, node: &NodeId) -> Result<(), MessengerError> {
        if *node == self.hub.node {
            return Err(MessengerError::RemoveSelf);
        }
        if let Some(id) = self.hub.connection_for(node) {
            self.switchboard.close(id);
        }
        Ok(())
    }

    /// Hardware identifier of a connected node, or of one of the last few to
    /// leave
    #[must_use]
    pub fn player_mac(&self, name: &str) -> Option<String> {
        let nodes = self.hub.nodes();
        nodes.macs.get(name).cloned().or_else(|| {
            nodes.departed.iter().rev().find(|(departed, _)| departed == name).map(|(_, mac)| mac.clone())
        })
    }

    /// Close every connection and stop accepting. Idempotent.
    pub fn shutdown(&self) {
        self.switchboard.shutdown();
    }

    /// True after [`ServerMessenger::shutdown`]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.switchboard.is_shut_down()
    }
}

impl Drop for ServerMessenger {
    fn drop(&mut self) {
        self.shutdown();
    }
}
