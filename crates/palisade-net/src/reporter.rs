//! Error reporter.
//!
//! Any task that finds a connection unusable calls [`Switchboard::report`].
//! The first report for a connection removes it from the registry, fires its
//! gates and queues the handler notification behind every frame the decoder
//! has not yet seen. Later reports for the same connection are no-ops.

use tracing::{debug, trace, warn};

use crate::{
    decoder::Ingress,
    error::ConnectionError,
    registry::{CloseMode, ConnectionId},
    switchboard::Switchboard,
};

impl Switchboard {
    /// Tear a connection down. Returns `true` for the report that did it.
    pub(crate) fn report(&self, id: ConnectionId, cause: ConnectionError, mode: CloseMode) -> bool {
        let Some(entry) = self.registry().remove(id) else {
            trace!(connection = %id, %cause, "already closed");
            return false;
        };

        match &cause {
            ConnectionError::Closed | ConnectionError::Removed | ConnectionError::Shutdown => {
                debug!(connection = %id, peer = %entry.peer, %cause, "connection closed");
            },
            cause if cause.is_login_rejection() => {
                debug!(connection = %id, peer = %entry.peer, %cause, "login rejected, flushing");
            },
            _ => {
                warn!(connection = %id, peer = %entry.peer, %cause, "connection failed");
            },
        }

        entry.close(mode);
        let _ = self.ingress().send(Ingress::Closed { id, cause });
        true
    }
}
