//! Read path: one task per connection.
//!
//! Accumulates partial reads and pushes each complete frame onto the shared
//! ingress queue in arrival order. A read-side failure is pushed onto the
//! same queue, after the frames that preceded it, so the decoder sees every
//! frame the peer managed to send before the failure is reported.

use bytes::BytesMut;
use palisade_proto::FrameReader;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::{debug, trace};

use crate::{decoder::Ingress, error::ConnectionError, gate::Gate, registry::ConnectionId};

pub(crate) async fn read_loop<R>(
    id: ConnectionId,
    mut reader: R,
    closed: Gate,
    ingress: mpsc::UnboundedSender<Ingress>,
    mut frames: FrameReader,
    capacity: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(capacity);

    let cause = loop {
        if buf.len() == buf.capacity() {
            buf.reserve(capacity.max(1));
        }

        let read = tokio::select! {
            biased;
            () = closed.wait() => return,
            read = reader.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                if frames.is_mid_frame() || !buf.is_empty() {
                    debug!(connection = %id, buffered = buf.len(), "stream ended mid-frame");
                }
                break ConnectionError::Closed;
            },
            Ok(n) => {
                trace!(connection = %id, bytes = n, "read");
            },
            Err(err) => break ConnectionError::Io(err),
        }

        match push_frames(id, &mut frames, &mut buf, &ingress) {
            Ok(true) => {},
            Ok(false) => return,
            Err(cause) => break cause,
        }
    };

    let _ = ingress.send(Ingress::Failed { id, cause });
}

/// Push every complete frame in `buf`. Returns `Ok(false)` once the decoder
/// is gone.
fn push_frames(
    id: ConnectionId,
    frames: &mut FrameReader,
    buf: &mut BytesMut,
    ingress: &mpsc::UnboundedSender<Ingress>,
) -> Result<bool, ConnectionError> {
    while let Some(frame) = frames.decode(buf)? {
        if ingress.send(Ingress::Frame { id, frame }).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}
