//! Callback interfaces.
//!
//! [`SwitchboardHandler`] is the single consumer of switchboard events; the
//! messengers implement it. [`MessageListener`] and [`ConnectionListener`]
//! are what applications register with a messenger.
//!
//! Every callback runs on the decoder task. Callbacks must not block.

use std::sync::{Arc, PoisonError, RwLock};

use palisade_core::Promotion;
use palisade_proto::{Envelope, NodeId, Payload};

use crate::{error::ConnectionError, registry::ConnectionId, switchboard::Switchboard};

/// Receives connection lifecycle and trusted traffic from a switchboard
pub trait SwitchboardHandler: Send + Sync + 'static {
    /// A connection was registered and its conversation started
    fn connection_ready(&self, _switchboard: &Switchboard, _id: ConnectionId) {}

    /// A connection left quarantine
    fn promoted(&self, switchboard: &Switchboard, id: ConnectionId, promotion: &Promotion);

    /// An envelope arrived on a trusted connection
    fn envelope(&self, switchboard: &Switchboard, id: ConnectionId, envelope: Envelope);

    /// A connection was torn down. Called exactly once per connection.
    fn connection_lost(&self, switchboard: &Switchboard, id: ConnectionId, cause: ConnectionError);
}

/// Receives application messages delivered to the local node
pub trait MessageListener: Send + Sync {
    /// `payload` was sent by `from`
    fn message_received(&self, payload: &Payload, from: &NodeId);
}

impl<F> MessageListener for F
where
    F: Fn(&Payload, &NodeId) + Send + Sync,
{
    fn message_received(&self, payload: &Payload, from: &NodeId) {
        self(payload, from);
    }
}

/// Receives node membership changes
pub trait ConnectionListener: Send + Sync {
    /// A node finished its handshake
    fn connection_added(&self, node: &NodeId);

    /// A node's connection was closed
    fn connection_removed(&self, node: &NodeId);
}

/// Registered listeners of one messenger
#[derive(Default)]
pub(crate) struct Listeners {
    messages: RwLock<Vec<Arc<dyn MessageListener>>>,
    connections: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

impl Listeners {
    pub fn add_message(&self, listener: Arc<dyn MessageListener>) {
        self.messages.write().unwrap_or_else(PoisonError::into_inner).push(listener);
    }

    pub fn add_connection(&self, listener: Arc<dyn ConnectionListener>) {
        self.connections.write().unwrap_or_else(PoisonError::into_inner).push(listener);
    }

    pub fn message_received(&self, payload: &Payload, from: &NodeId) {
        for listener in self.messages.read().unwrap_or_else(PoisonError::into_inner).iter() {
            listener.message_received(payload, from);
        }
    }

    pub fn connection_added(&self, node: &NodeId) {
        for listener in self.connections.read().unwrap_or_else(PoisonError::into_inner).iter() {
            listener.connection_added(node);
        }
    }

    pub fn connection_removed(&self, node: &NodeId) {
        for listener in self.connections.read().unwrap_or_else(PoisonError::into_inner).iter() {
            listener.connection_removed(node);
        }
    }
}
