//! End-to-end messenger scenarios over the simulated network.
//!
//! Each test runs a real `ServerMessenger` on one turmoil host and one or
//! more `ClientMessenger`s on others. Shared state between hosts is limited
//! to recorded events, checked by polling in simulated time.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use palisade_core::{LoginAttempt, LoginValidator};
use palisade_harness::SimTransport;
use palisade_net::{
    ClientConfig, ClientMessenger, ConnectionListener, MessageListener, MessengerError,
    ServerConfig, ServerMessenger,
};
use palisade_proto::{NodeId, Payload, Properties};

const PORT: u16 = 3300;

/// Events recorded by a listener, shared across hosts
#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Wait in simulated time until `event` has been recorded
    async fn wait_for(&self, event: &str) {
        while !self.snapshot().iter().any(|e| e == event) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl MessageListener for Log {
    fn message_received(&self, payload: &Payload, from: &NodeId) {
        if let Payload::Text(text) = payload {
            self.push(format!("{}: {text}", from.name()));
        }
    }
}

impl ConnectionListener for Log {
    fn connection_added(&self, node: &NodeId) {
        self.push(format!("+{}", node.name()));
    }

    fn connection_removed(&self, node: &NodeId) {
        self.push(format!("-{}", node.name()));
    }
}

/// Rejects one name, accepts everyone else
struct Banned(&'static str);

impl LoginValidator for Banned {
    fn challenge(&self, _name: &str, _remote: SocketAddr) -> Properties {
        Properties::new()
    }

    fn verify(&self, attempt: &LoginAttempt<'_>) -> Option<String> {
        (attempt.name == self.0).then(|| format!("{} is banned", attempt.name))
    }
}

fn server_config() -> ServerConfig {
    ServerConfig::new("Server", SocketAddr::from(([0, 0, 0, 0], PORT)))
        .advertise(SimTransport::resolve("server", PORT))
}

async fn serve(server: ServerMessenger) -> Result<(), Box<dyn std::error::Error>> {
    // Stays up until the simulation ends
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if server.is_shut_down() {
            return Ok(());
        }
    }
}

async fn connect(name: &str) -> Result<ClientMessenger, MessengerError> {
    let config = ClientConfig::new(name, format!("mac-{name}"), SimTransport::resolve("server", PORT));
    ClientMessenger::builder(config).connect_with(SimTransport::client()).await
}

#[test]
fn client_logs_in_and_messages_server() {
    let mut sim = turmoil::Builder::new().build();
    let log = Log::default();

    let server_log = log.clone();
    sim.host("server", move || {
        let log = server_log.clone();
        async move {
            let transport = SimTransport::bind("0.0.0.0:3300").await?;
            let server = ServerMessenger::builder(server_config()).start(transport)?;
            server.add_message_listener(Arc::new(log.clone()));
            server.add_connection_listener(Arc::new(log));
            serve(server).await
        }
    });

    let client_log = log.clone();
    sim.client("alice", async move {
        let alice = connect("alice").await?;
        assert_eq!(alice.local_node().name(), "alice");
        assert_eq!(alice.local_node().address().ip(), turmoil::lookup("alice"));
        assert_eq!(alice.server_node(), &NodeId::new("Server", SimTransport::resolve("server", PORT)));

        alice.send(Payload::text("hello server"), alice.server_node())?;
        client_log.wait_for("alice: hello server").await;

        alice.shutdown();
        client_log.wait_for("-alice").await;
        Ok(())
    });

    sim.run().expect("simulation failed");
    assert_eq!(log.snapshot(), vec!["+alice", "alice: hello server", "-alice"]);
}

#[test]
fn banned_name_is_rejected() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let transport = SimTransport::bind("0.0.0.0:3300").await?;
        let server = ServerMessenger::builder(server_config())
            .validator(Arc::new(Banned("mallory")))
            .start(transport)?;
        serve(server).await
    });

    sim.client("mallory", async {
        match connect("mallory").await {
            Err(MessengerError::LoginRejected(message)) => assert_eq!(message, "mallory is banned"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("login should be rejected"),
        }
        let alice = connect("alice").await?;
        assert!(alice.is_connected());
        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn broadcast_is_relayed_between_clients() {
    let mut sim = turmoil::Builder::new().build();
    let log = Log::default();

    sim.host("server", || async {
        let transport = SimTransport::bind("0.0.0.0:3300").await?;
        let server = ServerMessenger::builder(server_config()).start(transport)?;
        serve(server).await
    });

    let bob_log = log.clone();
    sim.client("bob", async move {
        let bob = connect("bob").await?;
        bob.add_message_listener(Arc::new(bob_log.clone()));
        bob_log.push("bob ready".to_string());

        bob_log.wait_for("alice: one").await;
        bob_log.wait_for("alice: two").await;
        Ok(())
    });

    let alice_log = log.clone();
    sim.client("alice", async move {
        alice_log.wait_for("bob ready").await;
        let alice = connect("alice").await?;
        alice.broadcast(Payload::text("one"))?;
        alice.broadcast(Payload::text("two"))?;

        alice_log.wait_for("alice: two").await;
        Ok(())
    });

    sim.run().expect("simulation failed");
    assert_eq!(log.snapshot(), vec!["bob ready", "alice: one", "alice: two"]);
}

#[test]
fn duplicate_names_across_hosts() {
    let mut sim = turmoil::Builder::new().build();
    let log = Log::default();

    sim.host("server", || async {
        let transport = SimTransport::bind("0.0.0.0:3300").await?;
        let server = ServerMessenger::builder(server_config()).start(transport)?;
        serve(server).await
    });

    let first_log = log.clone();
    sim.client("first", async move {
        let first = connect("alice").await?;
        assert_eq!(first.local_node().name(), "alice");
        first_log.push("first in".to_string());
        first_log.wait_for("second in").await;
        Ok(())
    });

    let second_log = log.clone();
    sim.client("second", async move {
        second_log.wait_for("first in").await;
        let second = connect("alice").await?;
        assert_eq!(second.local_node().name(), "alice (1)");
        second_log.push("second in".to_string());
        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn removed_client_observes_disconnect() {
    let mut sim = turmoil::Builder::new().build();
    let log = Log::default();

    sim.host("server", || async {
        let transport = SimTransport::bind("0.0.0.0:3300").await?;
        let server = Arc::new(ServerMessenger::builder(server_config()).start(transport)?);

        // Kick whoever asks
        struct Kicker(std::sync::Weak<ServerMessenger>);
        impl MessageListener for Kicker {
            fn message_received(&self, payload: &Payload, from: &NodeId) {
                if *payload == Payload::text("kick me") {
                    if let Some(server) = self.0.upgrade() {
                        server.remove_connection(from).unwrap();
                    }
                }
            }
        }
        server.add_message_listener(Arc::new(Kicker(Arc::downgrade(&server))));

        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let client_log = log.clone();
    sim.client("alice", async move {
        let alice = connect("alice").await?;
        alice.add_connection_listener(Arc::new(client_log.clone()));

        alice.send(Payload::text("kick me"), alice.server_node())?;
        client_log.wait_for("-Server").await;
        assert!(!alice.is_connected());
        Ok(())
    });

    sim.run().expect("simulation failed");
}
