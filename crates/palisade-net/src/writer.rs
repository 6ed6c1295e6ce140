//! Write path: one task per connection.
//!
//! Drains the connection's outbound queue in FIFO order, batching whatever is
//! already queued into one write. The task ends in one of two ways:
//!
//! - The discard gate fires: queued frames are dropped and the task stops,
//!   even in the middle of a write.
//! - The queue's sender is dropped: everything queued is written, then the
//!   stream is shut down.

use bytes::BytesMut;
use palisade_proto::Frame;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, trace};

use crate::{
    error::ConnectionError,
    gate::Gate,
    registry::{CloseMode, ConnectionId},
    switchboard::Switchboard,
};

/// Stop batching once this many bytes are pending
const BATCH_BYTES: usize = 64 * 1024;

pub(crate) async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    discard: Gate,
    switchboard: Switchboard,
) where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();

    loop {
        let next = tokio::select! {
            biased;
            () = discard.wait() => return,
            next = outbound.recv() => next,
        };

        let Some(frame) = next else {
            let _ = tokio::select! {
                biased;
                () = discard.wait() => return,
                shutdown = writer.shutdown() => shutdown,
            };
            debug!(connection = %id, "outbound drained");
            return;
        };

        buf.clear();
        buf.reserve(frame.wire_len());
        frame.encode(&mut buf);
        while buf.len() < BATCH_BYTES {
            match outbound.try_recv() {
                Ok(frame) => {
                    buf.reserve(frame.wire_len());
                    frame.encode(&mut buf);
                },
                Err(_) => break,
            }
        }

        let written = tokio::select! {
            biased;
            () = discard.wait() => return,
            written = async {
                writer.write_all(&buf).await?;
                writer.flush().await
            } => written,
        };

        match written {
            Ok(()) => trace!(connection = %id, bytes = buf.len(), "wrote"),
            Err(err) => {
                switchboard.report(id, ConnectionError::Io(err), CloseMode::Abort);
                return;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use palisade_core::Promotion;
    use palisade_proto::{Envelope, FrameReader};
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::{config::SwitchboardConfig, listener::SwitchboardHandler};

    struct Ignore;

    impl SwitchboardHandler for Ignore {
        fn promoted(&self, _: &Switchboard, _: ConnectionId, _: &Promotion) {}

        fn envelope(&self, _: &Switchboard, _: ConnectionId, _: Envelope) {}

        fn connection_lost(&self, _: &Switchboard, _: ConnectionId, _: ConnectionError) {}
    }

    fn frame(payload: &[u8]) -> Frame {
        Frame::new(payload.to_vec()).unwrap()
    }

    async fn read_all(mut peer: tokio::io::DuplexStream) -> Vec<Frame> {
        let mut raw = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), peer.read_to_end(&mut raw))
            .await
            .unwrap()
            .unwrap();
        let mut bytes = BytesMut::from(raw.as_slice());

        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        while let Some(frame) = reader.decode(&mut bytes).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn dropped_sender_flushes_then_shuts_down() {
        let switchboard = Switchboard::builder(SwitchboardConfig::default()).start(Arc::new(Ignore));
        let (stream, peer) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();

        for payload in [&b"one"[..], b"two", b"three"] {
            tx.send(frame(payload)).unwrap();
        }
        drop(tx);

        let task = tokio::spawn(write_loop(
            ConnectionId::from_raw(1),
            stream,
            rx,
            Gate::new(),
            switchboard.clone(),
        ));

        let frames = read_all(peer).await;
        let payloads: Vec<&[u8]> = frames.iter().map(|f| f.payload().as_ref()).collect();
        assert_eq!(payloads, vec![&b"one"[..], b"two", b"three"]);
        task.await.unwrap();
        switchboard.shutdown();
    }

    #[tokio::test]
    async fn discard_drops_queued_frames() {
        let switchboard = Switchboard::builder(SwitchboardConfig::default()).start(Arc::new(Ignore));
        let (stream, mut peer) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let discard = Gate::new();

        tx.send(frame(b"never")).unwrap();
        discard.fire();

        let task = tokio::spawn(write_loop(
            ConnectionId::from_raw(1),
            stream,
            rx,
            discard,
            switchboard.clone(),
        ));
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        // Writer dropped without writing: the peer sees EOF immediately
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        drop(tx);
        switchboard.shutdown();
    }
}
