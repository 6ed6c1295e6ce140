//! Palisade network runtime
//!
//! Drives the pure handshake state machines from `palisade-core` over real
//! (or simulated) byte streams.
//!
//! # Architecture
//!
//! ```text
//!  socket ─> reader task ─┐                          ┌─> writer task ─> socket
//!  socket ─> reader task ─┼─> ingress ─> decoder ─┬─>│   (one per connection)
//!  socket ─> reader task ─┘   (one queue)  task   │  └─> writer task ─> socket
//!                                                 └─> handler (messenger)
//! ```
//!
//! - Every connection gets a reader task and a writer task. Readers push
//!   complete frames onto a single ingress queue, so the order frames are
//!   pushed is a total order across all connections.
//! - A single decoder task drains the ingress queue. Quarantined connections
//!   feed their conversation; trusted connections feed the handler. No two
//!   envelopes are ever processed concurrently.
//! - Writers drain a per-connection outbound queue. Any task may enqueue.
//! - The error reporter tears a connection down exactly once, however many
//!   tasks notice the failure.
//!
//! The [`Switchboard`] owns all of this. [`ServerMessenger`] and
//! [`ClientMessenger`] sit on top of it and add node bookkeeping and routing.

pub mod config;
mod credentials;
mod decoder;
mod encoder;
pub mod error;
pub mod gate;
pub mod listener;
pub mod messenger;
mod reader;
pub mod registry;
mod reporter;
pub mod switchboard;
pub mod transport;
mod writer;

pub use config::{ClientConfig, ServerConfig, SwitchboardConfig};
pub use error::{ConnectionError, MessengerError};
pub use gate::Gate;
pub use listener::{ConnectionListener, MessageListener, SwitchboardHandler};
pub use messenger::{ClientBuilder, ClientMessenger, ServerBuilder, ServerMessenger};
pub use registry::{ConnectionId, Phase};
pub use switchboard::Switchboard;
pub use transport::{Link, TcpTransport, Transport};
