//! The switchboard: connection registry, ingress queue and decoder task.
//!
//! A `Switchboard` is a cheap cloneable handle. Connections are added as
//! [`Link`]s together with the conversation that will decide whether they
//! are trusted. From then on the switchboard runs their reader and writer
//! tasks, feeds their frames through the single decoder task and reports
//! every outcome to the [`SwitchboardHandler`].

use std::{net::SocketAddr, sync::Arc};

use palisade_core::{Conversation, CredentialPrompt};
use palisade_proto::{FrameReader, NodeId, Perspective};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tracing::{debug, info};

use crate::{
    config::SwitchboardConfig,
    decoder::{Decoder, Ingress},
    error::ConnectionError,
    gate::Gate,
    listener::SwitchboardHandler,
    reader,
    registry::{CloseMode, ConnectionId, Entry, Phase, Registry},
    transport::Link,
    writer,
};

struct Shared {
    config: SwitchboardConfig,
    registry: Registry,
    ingress: mpsc::UnboundedSender<Ingress>,
    shutdown: Gate,
}

/// Handle to a running switchboard
#[derive(Clone)]
pub struct Switchboard {
    shared: Arc<Shared>,
}

/// Configures a switchboard before its decoder task starts
pub struct SwitchboardBuilder {
    config: SwitchboardConfig,
    credentials: Option<Arc<dyn CredentialPrompt>>,
}

impl SwitchboardBuilder {
    /// Answer server challenges with `prompt`. Without a prompt every
    /// challenge abandons the login.
    #[must_use]
    pub fn credentials(mut self, prompt: Option<Arc<dyn CredentialPrompt>>) -> Self {
        self.credentials = prompt;
        self
    }

    /// Spawn the decoder task. Must be called within a tokio runtime.
    pub fn start(self, handler: Arc<dyn SwitchboardHandler>) -> Switchboard {
        let (ingress, queue) = mpsc::unbounded_channel();
        let switchboard = Switchboard {
            shared: Arc::new(Shared {
                config: self.config,
                registry: Registry::new(),
                ingress,
                shutdown: Gate::new(),
            }),
        };

        let decoder = Decoder::new(switchboard.clone(), queue, handler, self.credentials);
        tokio::spawn(decoder.run());
        switchboard
    }
}

impl Switchboard {
    /// Begin configuring a switchboard
    pub fn builder(config: SwitchboardConfig) -> SwitchboardBuilder {
        SwitchboardBuilder { config, credentials: None }
    }

    /// Take ownership of a stream and start its handshake.
    ///
    /// `local` is this side's identity on the connection. The remote side is
    /// provisional until `conversation` promotes it.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` if the switchboard has been shut down; the link is
    /// dropped.
    pub fn add_connection<R, W>(
        &self,
        link: Link<R, W>,
        local: NodeId,
        conversation: Conversation,
    ) -> Result<ConnectionId, ConnectionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(ConnectionError::Shutdown);
        }

        let (outbound, outbound_queue) = mpsc::unbounded_channel();
        let closed = Gate::new();
        let discard = Gate::new();
        let id = self.shared.registry.insert(Entry {
            peer: link.remote,
            perspective: Perspective::new(local, NodeId::provisional(link.remote)),
            outbound,
            phase: Phase::Quarantined,
            closed: closed.clone(),
            discard: discard.clone(),
        });

        // Added must precede the connection's first frame on the queue
        if self.shared.ingress.send(Ingress::Added { id, conversation }).is_err()
            || self.is_shut_down()
        {
            if let Some(entry) = self.shared.registry.remove(id) {
                entry.close(CloseMode::Abort);
            }
            return Err(ConnectionError::Shutdown);
        }

        debug!(connection = %id, peer = %link.remote, "connection quarantined");

        let config = self.shared.config;
        let frames = FrameReader::with_limit(config.frame_limit());
        tokio::spawn(reader::read_loop(
            id,
            link.reader,
            closed,
            self.shared.ingress.clone(),
            frames,
            config.read_buffer_capacity,
        ));
        tokio::spawn(writer::write_loop(id, link.writer, outbound_queue, discard, self.clone()));

        Ok(id)
    }

    /// Close a connection immediately, discarding queued frames.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self, id: ConnectionId) -> bool {
        self.report(id, ConnectionError::Removed, CloseMode::Abort)
    }

    /// Close every connection and stop the decoder. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.fire() {
            return;
        }

        let entries = self.shared.registry.drain();
        info!(connections = entries.len(), "switchboard shutting down");
        for (id, entry) in entries {
            entry.close(CloseMode::Abort);
            let _ = self.shared.ingress.send(Ingress::Closed { id, cause: ConnectionError::Shutdown });
        }
        let _ = self.shared.ingress.send(Ingress::Shutdown);
    }

    /// True after [`Switchboard::shutdown`]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_fired()
    }

    /// Wait until [`Switchboard::shutdown`] is called
    pub async fn shut_down(&self) {
        self.shared.shutdown.wait().await;
    }

    /// Quarantine phase of a live connection
    #[must_use]
    pub fn phase(&self, id: ConnectionId) -> Option<Phase> {
        self.shared.registry.view(id).map(|(phase, _)| phase)
    }

    /// Identities of both ends of a live connection
    #[must_use]
    pub fn perspective(&self, id: ConnectionId) -> Option<Perspective> {
        self.shared.registry.view(id).map(|(_, perspective)| perspective)
    }

    /// Remote socket address of a live connection
    #[must_use]
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.shared.registry.peer(id)
    }

    /// All live connections, quarantined or trusted
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    /// Live trusted connections and the node on the other end
    #[must_use]
    pub fn trusted(&self) -> Vec<(ConnectionId, NodeId)> {
        self.shared.registry.trusted()
    }

    /// Configuration this switchboard runs with
    #[must_use]
    pub fn config(&self) -> &SwitchboardConfig {
        &self.shared.config
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub(crate) fn ingress(&self) -> &mpsc::UnboundedSender<Ingress> {
        &self.shared.ingress
    }
}
