//! Connection registry.
//!
//! Maps each live connection to the state every task needs: the peer
//! address, the identity perspective used for envelope compression, the
//! outbound queue feeding its writer, its quarantine phase and its gates.
//!
//! # Invariants
//!
//! - A `ConnectionId` is never reused; ids increase monotonically.
//! - An entry exists from registration until the error reporter removes it.
//!   Removal happens once; every later lookup misses.
//! - Phase only moves from `Quarantined` to `Trusted`.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use palisade_proto::{Frame, NodeId, Perspective};
use tokio::sync::mpsc;

use crate::gate::Gate;

/// Opaque handle for one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw numeric value
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Quarantine phase of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Only the handshake conversation sees this connection's messages
    Quarantined,
    /// Messages go to the handler
    Trusted,
}

/// How a removed connection's writer should finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseMode {
    /// Drop queued frames and stop immediately
    Abort,
    /// Write queued frames, then shut the stream down
    Flush,
}

/// Registry entry for one connection
#[derive(Debug)]
pub(crate) struct Entry {
    pub peer: SocketAddr,
    pub perspective: Perspective,
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub phase: Phase,
    /// Fired when the connection is removed; stops the reader and any
    /// credential hand-off
    pub closed: Gate,
    /// Fired when queued frames must be discarded; stops the writer
    pub discard: Gate,
}

impl Entry {
    /// Signal every task of a removed entry
    pub fn close(self, mode: CloseMode) {
        self.closed.fire();
        if mode == CloseMode::Abort {
            self.discard.fire();
        }
        // Dropping `outbound` lets a flushing writer finish once drained
    }
}

/// Snapshot of what the encoder needs to send on a connection
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub perspective: Perspective,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<ConnectionId, Entry>,
}

/// Concurrency-safe map of live connections
#[derive(Debug, Default)]
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries stay consistent across a panicking holder: every mutation is
        // a single insert, remove or field store
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection, returning its fresh id
    pub fn insert(&self, entry: Entry) -> ConnectionId {
        let mut inner = self.lock();
        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.entries.insert(id, entry);
        id
    }

    /// Remove a connection. Only the first call for an id returns the entry.
    pub fn remove(&self, id: ConnectionId) -> Option<Entry> {
        self.lock().entries.remove(&id)
    }

    /// Remove every connection
    pub fn drain(&self) -> Vec<(ConnectionId, Entry)> {
        self.lock().entries.drain().collect()
    }

    /// Phase and perspective of a live connection
    pub fn view(&self, id: ConnectionId) -> Option<(Phase, Perspective)> {
        self.lock().entries.get(&id).map(|entry| (entry.phase, entry.perspective.clone()))
    }

    /// Encoder route of a live connection
    pub fn route(&self, id: ConnectionId) -> Option<Route> {
        self.lock().entries.get(&id).map(|entry| Route {
            perspective: entry.perspective.clone(),
            outbound: entry.outbound.clone(),
        })
    }

    /// Closed gate of a live connection
    pub fn closed_gate(&self, id: ConnectionId) -> Option<Gate> {
        self.lock().entries.get(&id).map(|entry| entry.closed.clone())
    }

    /// Peer socket address of a live connection
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.lock().entries.get(&id).map(|entry| entry.peer)
    }

    /// Move a connection out of quarantine with its final identities.
    ///
    /// Returns `false` if the connection is gone or already trusted.
    pub fn promote(&self, id: ConnectionId, local: Option<NodeId>, remote: NodeId) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return false;
        };
        if entry.phase == Phase::Trusted {
            return false;
        }
        entry.phase = Phase::Trusted;
        if let Some(local) = local {
            entry.perspective.local = local;
        }
        entry.perspective.remote = remote;
        true
    }

    /// Ids of all live connections, ascending
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Live trusted connections with their peer identity, ascending by id
    pub fn trusted(&self) -> Vec<(ConnectionId, NodeId)> {
        let mut trusted: Vec<_> = self
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.phase == Phase::Trusted)
            .map(|(id, entry)| (*id, entry.perspective.remote.clone()))
            .collect();
        trusted.sort_unstable_by_key(|(id, _)| *id);
        trusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(peer: &str) -> (Entry, mpsc::UnboundedReceiver<Frame>) {
        let peer: SocketAddr = peer.parse().unwrap();
        let (outbound, rx) = mpsc::unbounded_channel();
        let local = NodeId::new("server1", "10.0.0.1:3300".parse().unwrap());
        let entry = Entry {
            peer,
            perspective: Perspective::new(local, NodeId::provisional(peer)),
            outbound,
            phase: Phase::Quarantined,
            closed: Gate::new(),
            discard: Gate::new(),
        };
        (entry, rx)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let registry = Registry::new();
        let (a, _rx_a) = entry("10.0.0.2:1");
        let (b, _rx_b) = entry("10.0.0.3:1");

        let first = registry.insert(a);
        assert!(registry.remove(first).is_some());
        let second = registry.insert(b);

        assert!(second > first);
        assert_eq!(registry.ids(), vec![second]);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::new();
        let (a, _rx) = entry("10.0.0.2:1");
        let id = registry.insert(a);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.view(id).is_none());
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn promote_updates_perspective_once() {
        let registry = Registry::new();
        let (a, _rx) = entry("10.0.0.2:51000");
        let id = registry.insert(a);
        let alice = NodeId::new("alice", "10.0.0.2:51000".parse().unwrap());

        assert_eq!(registry.view(id).map(|(phase, _)| phase), Some(Phase::Quarantined));
        assert!(registry.trusted().is_empty());

        assert!(registry.promote(id, None, alice.clone()));
        assert!(!registry.promote(id, None, alice.clone()));

        let (phase, perspective) = registry.view(id).unwrap();
        assert_eq!(phase, Phase::Trusted);
        assert_eq!(perspective.remote, alice);
        assert_eq!(registry.trusted(), vec![(id, alice)]);
    }

    #[test]
    fn abort_fires_both_gates() {
        let (a, _rx) = entry("10.0.0.2:1");
        let (closed, discard) = (a.closed.clone(), a.discard.clone());
        a.close(CloseMode::Abort);
        assert!(closed.is_fired());
        assert!(discard.is_fired());
    }

    #[test]
    fn flush_keeps_queue_and_drops_sender() {
        let (a, mut rx) = entry("10.0.0.2:1");
        a.outbound.send(Frame::new(vec![1u8]).unwrap()).unwrap();
        let (closed, discard) = (a.closed.clone(), a.discard.clone());
        a.close(CloseMode::Flush);

        assert!(closed.is_fired());
        assert!(!discard.is_fired());
        assert!(rx.try_recv().is_ok());
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }
}
