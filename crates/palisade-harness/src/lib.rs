//! Deterministic simulation harness for Palisade.
//!
//! Provides a turmoil-backed [`Transport`](palisade_net::Transport) so the
//! real switchboard and messengers run over a simulated network with
//! controlled latency, loss and scheduling.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod sim_transport;

pub use sim_transport::SimTransport;
