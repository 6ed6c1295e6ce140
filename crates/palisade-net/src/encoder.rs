//! Encoder: envelopes to frames on a connection's outbound queue.
//!
//! Identity compression depends on the connection, so encoding always uses
//! the perspective of the connection the frame will travel on. Encoding
//! touches nothing shared beyond a snapshot of that perspective and may run
//! on any task.

use palisade_proto::{Envelope, Frame, Payload, Perspective, ProtocolError};
use tracing::trace;

use crate::{registry::ConnectionId, switchboard::Switchboard};

/// Encode `envelope` for the connection seen through `perspective`
pub(crate) fn encode(
    envelope: &Envelope,
    perspective: &Perspective,
    limit: usize,
) -> Result<Frame, ProtocolError> {
    let frame = envelope.into_frame(perspective)?;
    if frame.len() > limit {
        return Err(ProtocolError::FrameTooLarge { size: frame.len(), max: limit });
    }
    Ok(frame)
}

impl Switchboard {
    /// Queue a raw frame for a connection's writer.
    ///
    /// Returns `false` if the connection is gone.
    pub fn enqueue_frame(&self, id: ConnectionId, frame: Frame) -> bool {
        self.registry().route(id).is_some_and(|route| route.outbound.send(frame).is_ok())
    }

    /// Encode and queue an envelope for a connection.
    ///
    /// Returns `Ok(false)` if the connection is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be encoded or exceeds the
    /// frame limit. The connection is unaffected.
    pub fn enqueue(&self, id: ConnectionId, envelope: &Envelope) -> Result<bool, ProtocolError> {
        let Some(route) = self.registry().route(id) else {
            return Ok(false);
        };
        let frame = encode(envelope, &route.perspective, self.config().frame_limit())?;
        trace!(connection = %id, bytes = frame.len(), "enqueue");
        Ok(route.outbound.send(frame).is_ok())
    }

    /// Send a payload directly to the peer of a connection, with both
    /// identities implied.
    pub(crate) fn reply(&self, id: ConnectionId, payload: Payload) -> Result<bool, ProtocolError> {
        let Some(route) = self.registry().route(id) else {
            return Ok(false);
        };
        let perspective = route.perspective;
        let envelope =
            Envelope::to(perspective.remote.clone(), perspective.local.clone(), payload);
        let frame = encode(&envelope, &perspective, self.config().frame_limit())?;
        Ok(route.outbound.send(frame).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use palisade_proto::NodeId;

    use super::*;

    fn perspective() -> Perspective {
        Perspective::new(
            NodeId::new("server1", "10.0.0.1:3300".parse().unwrap()),
            NodeId::new("alice", "10.0.0.2:51000".parse().unwrap()),
        )
    }

    #[test]
    fn implied_reply_is_three_bytes() {
        let perspective = perspective();
        let envelope =
            Envelope::to(perspective.remote.clone(), perspective.local.clone(), Payload::Null);
        let frame = encode(&envelope, &perspective, 1024).unwrap();
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn frame_limit_is_enforced() {
        let perspective = perspective();
        let envelope = Envelope::broadcast(perspective.local.clone(), Payload::text("x".repeat(64)));
        assert!(matches!(
            encode(&envelope, &perspective, 16),
            Err(ProtocolError::FrameTooLarge { max: 16, .. })
        ));
    }
}
