//! Runtime configuration.

use std::net::SocketAddr;

use palisade_proto::MAX_FRAME_SIZE;

/// Default read buffer size per connection
pub const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// Switchboard configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchboardConfig {
    /// Largest frame accepted or produced, in bytes (capped at
    /// [`MAX_FRAME_SIZE`])
    pub max_frame_size: usize,
    /// Initial read buffer capacity per connection
    pub read_buffer_capacity: usize,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self { max_frame_size: MAX_FRAME_SIZE, read_buffer_capacity: DEFAULT_READ_BUFFER }
    }
}

impl SwitchboardConfig {
    /// Frame limit actually enforced
    #[must_use]
    pub fn frame_limit(&self) -> usize {
        self.max_frame_size.clamp(1, MAX_FRAME_SIZE)
    }
}

/// Server messenger configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Display name of the server node
    pub name: String,
    /// Address to listen on
    pub bind: SocketAddr,
    /// Address announced to clients, defaults to the bound address
    pub advertised_address: Option<SocketAddr>,
    /// Whether new connections are accepted at start
    pub accept_connections: bool,
    /// Switchboard tuning
    pub switchboard: SwitchboardConfig,
}

impl ServerConfig {
    /// Create a config that accepts connections on `bind`
    pub fn new(name: impl Into<String>, bind: SocketAddr) -> Self {
        Self {
            name: name.into(),
            bind,
            advertised_address: None,
            accept_connections: true,
            switchboard: SwitchboardConfig::default(),
        }
    }

    /// Announce a different address than the bound one
    #[must_use]
    pub fn advertise(mut self, address: SocketAddr) -> Self {
        self.advertised_address = Some(address);
        self
    }

    /// Start with new connections accepted or refused
    #[must_use]
    pub fn accept_connections(mut self, accept: bool) -> Self {
        self.accept_connections = accept;
        self
    }

    /// Override switchboard tuning
    #[must_use]
    pub fn switchboard(mut self, switchboard: SwitchboardConfig) -> Self {
        self.switchboard = switchboard;
        self
    }
}

/// Client messenger configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Requested display name
    pub name: String,
    /// Hardware identifier token sent during the handshake
    pub mac: String,
    /// Server to connect to
    pub server: SocketAddr,
    /// Switchboard tuning
    pub switchboard: SwitchboardConfig,
}

impl ClientConfig {
    /// Create a config for connecting to `server`
    pub fn new(name: impl Into<String>, mac: impl Into<String>, server: SocketAddr) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
            server,
            switchboard: SwitchboardConfig::default(),
        }
    }

    /// Override switchboard tuning
    #[must_use]
    pub fn switchboard(mut self, switchboard: SwitchboardConfig) -> Self {
        self.switchboard = switchboard;
        self
    }
}
