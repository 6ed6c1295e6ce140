//! Turmoil-based Transport implementation using TCP streams.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use palisade_net::{Link, Transport};
use tokio::io::{ReadHalf, WriteHalf};
use turmoil::net::{TcpListener, TcpStream};

/// Simulation transport using turmoil's deterministic TCP streams.
///
/// Turmoil controls delivery order and timing, and can inject latency, loss
/// and partitions between hosts. Streams keep TCP semantics, so everything
/// above the transport behaves as it does over a real socket.
pub struct SimTransport {
    listener: Option<TcpListener>,
}

impl SimTransport {
    /// Listen on `address` inside the simulation (e.g. `"0.0.0.0:3300"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or malformed.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener: Some(listener) })
    }

    /// Transport that only opens outgoing streams
    pub fn client() -> Self {
        Self { listener: None }
    }

    /// Resolve a simulated host name to a socket address
    pub fn resolve(host: &str, port: u16) -> SocketAddr {
        SocketAddr::new(turmoil::lookup(host), port)
    }

    fn split(stream: TcpStream) -> io::Result<Link<ReadHalf<TcpStream>, WriteHalf<TcpStream>>> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Link { reader, writer, local, remote })
    }

    fn not_listening() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "transport is not listening")
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Reader = ReadHalf<TcpStream>;
    type Writer = WriteHalf<TcpStream>;

    async fn accept(&self) -> io::Result<Link<Self::Reader, Self::Writer>> {
        let listener = self.listener.as_ref().ok_or_else(Self::not_listening)?;
        let (stream, _) = listener.accept().await?;
        Self::split(stream)
    }

    async fn connect(&self, remote: SocketAddr) -> io::Result<Link<Self::Reader, Self::Writer>> {
        Self::split(TcpStream::connect(remote).await?)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.as_ref().ok_or_else(Self::not_listening)?.local_addr()
    }
}
