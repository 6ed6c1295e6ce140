//! Messengers: node-level APIs on top of a switchboard.
//!
//! - [`ServerMessenger`] accepts connections, allocates unique names, keeps
//!   the node table and routes trusted envelopes between clients.
//! - [`ClientMessenger`] connects to a server and resolves once the handshake
//!   promotes the connection.

mod client;
mod server;

pub use client::{ClientBuilder, ClientMessenger};
pub use server::{ServerBuilder, ServerMessenger};
