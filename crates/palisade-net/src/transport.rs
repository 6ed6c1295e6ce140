//! Transport abstraction for network I/O.
//!
//! The `Transport` trait abstracts over reliable, ordered byte streams so the
//! same switchboard runs over:
//!
//! - **TCP** (production via tokio)
//! - **Simulated TCP** (deterministic tests via turmoil, see
//!   `palisade-harness`)
//!
//! A transport hands out [`Link`]s: the two halves of one stream plus the
//! addresses of both ends. The switchboard owns a link from then on.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

/// One established stream, split for concurrent reading and writing.
#[derive(Debug)]
pub struct Link<R, W> {
    /// Receive half
    pub reader: R,
    /// Send half
    pub writer: W,
    /// Our end of the stream
    pub local: SocketAddr,
    /// The peer's end of the stream, as observed by us
    pub remote: SocketAddr,
}

/// Abstract transport for reliable, ordered byte streams.
///
/// # Guarantees
///
/// - **Reliability**: Bytes are delivered or an error is returned
/// - **Ordering**: Bytes arrive in the order they were sent
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Receive half of a stream
    type Reader: AsyncRead + Unpin + Send + 'static;

    /// Send half of a stream
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next incoming stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not listening or accepting
    /// failed.
    async fn accept(&self) -> io::Result<Link<Self::Reader, Self::Writer>>;

    /// Open a stream to `remote`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote endpoint is unreachable or refuses.
    async fn connect(&self, remote: SocketAddr) -> io::Result<Link<Self::Reader, Self::Writer>>;

    /// Address this transport listens on.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not listening.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Production transport over tokio TCP
#[derive(Debug, Default)]
pub struct TcpTransport {
    listener: Option<TcpListener>,
}

impl TcpTransport {
    /// Listen on `address`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(address: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener: Some(listener) })
    }

    /// Transport that only opens outgoing streams
    pub fn client() -> Self {
        Self { listener: None }
    }

    fn split(stream: TcpStream) -> io::Result<Link<OwnedReadHalf, OwnedWriteHalf>> {
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Link { reader, writer, local, remote })
    }

    fn not_listening() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "transport is not listening")
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn accept(&self) -> io::Result<Link<Self::Reader, Self::Writer>> {
        let listener = self.listener.as_ref().ok_or_else(Self::not_listening)?;
        let (stream, _) = listener.accept().await?;
        Self::split(stream)
    }

    async fn connect(&self, remote: SocketAddr) -> io::Result<Link<Self::Reader, Self::Writer>> {
        let stream = TcpStream::connect(remote).await?;
        Self::split(stream)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.as_ref().ok_or_else(Self::not_listening)?.local_addr()
    }
}
