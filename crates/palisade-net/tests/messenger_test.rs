//! Messenger integration tests over loopback TCP.
//!
//! Covers the login handshake end to end (plain, challenged, rejected,
//! cancelled), name allocation, routing between clients and server-side
//! membership management.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, mpsc as std_mpsc},
    time::Duration,
};

use palisade_core::LoginAttempt;
use palisade_net::{
    ClientConfig, ClientMessenger, ConnectionListener, MessageListener, MessengerError,
    ServerConfig, ServerMessenger,
};
use palisade_proto::{NodeId, Payload, Properties};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Forwards received messages to a channel
struct Inbox(mpsc::UnboundedSender<(Payload, NodeId)>);

impl MessageListener for Inbox {
    fn message_received(&self, payload: &Payload, from: &NodeId) {
        let _ = self.0.send((payload.clone(), from.clone()));
    }
}

/// Forwards membership changes to a channel, `true` for joins
struct Membership(mpsc::UnboundedSender<(bool, NodeId)>);

impl ConnectionListener for Membership {
    fn connection_added(&self, node: &NodeId) {
        let _ = self.0.send((true, node.clone()));
    }

    fn connection_removed(&self, node: &NodeId) {
        let _ = self.0.send((false, node.clone()));
    }
}

/// Challenges for a password and rejects anything but `hunter2`
struct Password;

impl palisade_core::LoginValidator for Password {
    fn challenge(&self, _name: &str, _remote: SocketAddr) -> Properties {
        Properties::from([("password".to_string(), "required".to_string())])
    }

    fn verify(&self, attempt: &LoginAttempt<'_>) -> Option<String> {
        let password = attempt.response.and_then(|response| response.get("password"));
        match password.map(String::as_str) {
            Some("hunter2") => None,
            _ => Some("bad password".to_string()),
        }
    }
}

/// Rejects every login without a challenge
struct Closed;

impl palisade_core::LoginValidator for Closed {
    fn challenge(&self, _name: &str, _remote: SocketAddr) -> Properties {
        Properties::new()
    }

    fn verify(&self, _attempt: &LoginAttempt<'_>) -> Option<String> {
        Some("server full".to_string())
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn server() -> ServerMessenger {
    ServerMessenger::bind(ServerConfig::new("Server", loopback())).await.unwrap()
}

async fn client(server: &ServerMessenger, name: &str) -> ClientMessenger {
    let config = ClientConfig::new(name, format!("mac-{name}"), server.local_addr());
    tokio::time::timeout(WAIT, ClientMessenger::connect(config)).await.unwrap().unwrap()
}

fn inbox() -> (Arc<Inbox>, mpsc::UnboundedReceiver<(Payload, NodeId)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Inbox(tx)), rx)
}

fn membership() -> (Arc<Membership>, mpsc::UnboundedReceiver<(bool, NodeId)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Membership(tx)), rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn nothing_more<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "unexpected {extra:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_without_challenge() {
    let server = server().await;
    let (members, mut joined) = membership();
    server.add_connection_listener(members);

    let alice = client(&server, "alice").await;

    assert_eq!(alice.local_node().name(), "alice");
    assert_eq!(alice.server_node().name(), "Server");
    assert_eq!(alice.server_node().address(), server.local_addr());
    assert!(alice.is_connected());

    let (added, node) = next(&mut joined).await;
    assert!(added);
    assert_eq!(&node, alice.local_node());
    assert_eq!(server.nodes(), vec![alice.local_node().clone()]);
    assert!(server.is_connected(alice.local_node()));
    assert_eq!(server.player_mac("alice").as_deref(), Some("mac-alice"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_login_surfaces_server_message() {
    let server = ServerMessenger::builder(ServerConfig::new("Server", loopback()))
        .validator(Arc::new(Closed))
        .bind()
        .await
        .unwrap();
    let (members, mut joined) = membership();
    server.add_connection_listener(members);

    let config = ClientConfig::new("alice", "mac", server.local_addr());
    let result = tokio::time::timeout(WAIT, ClientMessenger::connect(config)).await.unwrap();

    assert!(matches!(result, Err(MessengerError::LoginRejected(ref message)) if message == "server full"));
    nothing_more(&mut joined).await;
    assert!(server.nodes().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn challenge_is_answered_by_prompt() {
    let server = ServerMessenger::builder(ServerConfig::new("Server", loopback()))
        .validator(Arc::new(Password))
        .bind()
        .await
        .unwrap();

    let right = ClientMessenger::builder(ClientConfig::new("alice", "mac", server.local_addr()))
        .credentials(Arc::new(|challenge: &Properties| -> Option<Properties> {
            assert!(challenge.contains_key("password"));
            Some(Properties::from([("password".to_string(), "hunter2".to_string())]))
        }));
    let alice = tokio::time::timeout(WAIT, right.connect()).await.unwrap().unwrap();
    assert_eq!(alice.local_node().name(), "alice");

    let wrong = ClientMessenger::builder(ClientConfig::new("bob", "mac", server.local_addr()))
        .credentials(Arc::new(|_: &Properties| -> Option<Properties> {
            Some(Properties::from([("password".to_string(), "guess".to_string())]))
        }));
    let result = tokio::time::timeout(WAIT, wrong.connect()).await.unwrap();
    assert!(matches!(result, Err(MessengerError::LoginRejected(ref message)) if message == "bad password"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn challenge_without_prompt_abandons_login() {
    let server = ServerMessenger::builder(ServerConfig::new("Server", loopback()))
        .validator(Arc::new(Password))
        .bind()
        .await
        .unwrap();

    let config = ClientConfig::new("alice", "mac", server.local_addr());
    let result = tokio::time::timeout(WAIT, ClientMessenger::connect(config)).await.unwrap();
    assert!(matches!(result, Err(MessengerError::Connection(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_prompt_is_cancelled_by_server_shutdown() {
    let server = ServerMessenger::builder(ServerConfig::new("Server", loopback()))
        .validator(Arc::new(Password))
        .bind()
        .await
        .unwrap();
    let address = server.local_addr();

    let (entered_tx, mut entered) = mpsc::unbounded_channel();
    let (release, blocked) = std_mpsc::channel::<()>();
    let blocked = Mutex::new(blocked);
    let prompt = move |_: &Properties| -> Option<Properties> {
        let _ = entered_tx.send(());
        let _ = blocked.lock().unwrap().recv();
        None
    };

    let pending = tokio::spawn(
        ClientMessenger::builder(ClientConfig::new("alice", "mac", address))
            .credentials(Arc::new(prompt))
            .connect(),
    );
    next(&mut entered).await;

    // Other logins proceed while the prompt is outstanding
    let bob = ClientMessenger::builder(ClientConfig::new("bob", "mac", address))
        .credentials(Arc::new(|_: &Properties| -> Option<Properties> {
            Some(Properties::from([("password".to_string(), "hunter2".to_string())]))
        }))
        .connect();
    let bob = tokio::time::timeout(WAIT, bob).await.unwrap().unwrap();
    assert_eq!(bob.local_node().name(), "bob");

    server.shutdown();
    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(MessengerError::Connection(_))));

    release.send(()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_names_are_suffixed() {
    let server = server().await;

    let first = client(&server, "alice").await;
    let second = client(&server, "ALICE").await;
    let third = client(&server, "server").await;
    let short = client(&server, "x").await;

    assert_eq!(first.local_node().name(), "alice");
    assert_eq!(second.local_node().name(), "ALICE (1)");
    assert_eq!(third.local_node().name(), "server (1)");
    assert_eq!(short.local_node().name(), "aax");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn direct_messages_reach_only_their_destination() {
    let server = server().await;
    let (server_inbox, mut server_rx) = inbox();
    server.add_message_listener(server_inbox);

    let alice = client(&server, "alice").await;
    let bob = client(&server, "bob").await;
    let (bob_inbox, mut bob_rx) = inbox();
    bob.add_message_listener(bob_inbox);
    let (alice_inbox, mut alice_rx) = inbox();
    alice.add_message_listener(alice_inbox);

    for text in ["one", "two", "three"] {
        alice.send(Payload::text(text), bob.local_node()).unwrap();
    }
    for text in ["one", "two", "three"] {
        let (payload, from) = next(&mut bob_rx).await;
        assert_eq!(payload, Payload::text(text));
        assert_eq!(&from, alice.local_node());
    }

    bob.send(Payload::pair("status", "ready"), alice.server_node()).unwrap();
    let (payload, from) = next(&mut server_rx).await;
    assert_eq!(payload, Payload::pair("status", "ready"));
    assert_eq!(&from, bob.local_node());

    server.send(Payload::text("welcome"), alice.local_node()).unwrap();
    let (payload, from) = next(&mut alice_rx).await;
    assert_eq!(payload, Payload::text("welcome"));
    assert_eq!(&from, server.local_node());

    nothing_more(&mut server_rx).await;
    nothing_more(&mut bob_rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcasts_reach_everyone_but_the_sender() {
    let server = server().await;
    let (server_inbox, mut server_rx) = inbox();
    server.add_message_listener(server_inbox);

    let alice = client(&server, "alice").await;
    let bob = client(&server, "bob").await;
    let (alice_inbox, mut alice_rx) = inbox();
    alice.add_message_listener(alice_inbox);
    let (bob_inbox, mut bob_rx) = inbox();
    bob.add_message_listener(bob_inbox);

    alice.broadcast(Payload::text("hello all")).unwrap();
    assert_eq!(next(&mut bob_rx).await, (Payload::text("hello all"), alice.local_node().clone()));
    assert_eq!(next(&mut server_rx).await, (Payload::text("hello all"), alice.local_node().clone()));
    nothing_more(&mut alice_rx).await;

    server.broadcast(Payload::text("maintenance")).unwrap();
    assert_eq!(next(&mut alice_rx).await, (Payload::text("maintenance"), server.local_node().clone()));
    assert_eq!(next(&mut bob_rx).await, (Payload::text("maintenance"), server.local_node().clone()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sends_to_unknown_nodes_are_ignored() {
    let server = server().await;
    let alice = client(&server, "alice").await;
    let ghost = NodeId::new("ghost", "10.9.9.9:1".parse().unwrap());

    server.send(Payload::text("anyone?"), &ghost).unwrap();
    alice.send(Payload::text("anyone?"), &ghost).unwrap();

    // The route is dropped, the sender stays connected
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(alice.is_connected());
    assert!(server.is_connected(alice.local_node()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connections_are_closed() {
    let server = server().await;
    server.set_accept_connections(false);
    assert!(!server.is_accepting_connections());

    let config = ClientConfig::new("alice", "mac", server.local_addr());
    let result = tokio::time::timeout(WAIT, ClientMessenger::connect(config)).await.unwrap();
    assert!(matches!(result, Err(MessengerError::Connection(_))));

    server.set_accept_connections(true);
    let alice = client(&server, "alice").await;
    assert!(alice.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_node_is_disconnected_and_mac_remembered() {
    let server = server().await;
    let (members, mut changes) = membership();
    server.add_connection_listener(members);

    let alice = client(&server, "alice").await;
    let (client_members, mut client_changes) = membership();
    alice.add_connection_listener(client_members);
    let node = alice.local_node().clone();
    assert_eq!(next(&mut changes).await, (true, node.clone()));

    assert!(matches!(
        server.remove_connection(server.local_node()),
        Err(MessengerError::RemoveSelf)
    ));

    server.remove_connection(&node).unwrap();
    assert_eq!(next(&mut changes).await, (false, node.clone()));
    assert_eq!(next(&mut client_changes).await, (false, alice.server_node().clone()));

    assert!(!alice.is_connected());
    assert!(!server.is_connected(&node));
    assert_eq!(server.player_mac("alice").as_deref(), Some("mac-alice"));

    // Removing twice is harmless
    server.remove_connection(&node).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn departed_macs_are_bounded() {
    let server = server().await;
    let (members, mut changes) = membership();
    server.add_connection_listener(members);

    for i in 0..11 {
        let node = client(&server, &format!("node{i}")).await;
        assert!(next(&mut changes).await.0);
        node.shutdown();
        assert!(!next(&mut changes).await.0);
    }

    assert_eq!(server.player_mac("node0"), None);
    assert_eq!(server.player_mac("node1").as_deref(), Some("mac-node1"));
    assert_eq!(server.player_mac("node10").as_deref(), Some("mac-node10"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_shutdown_disconnects_clients() {
    let server = server().await;
    let alice = client(&server, "alice").await;
    let (members, mut changes) = membership();
    alice.add_connection_listener(members);

    server.shutdown();
    server.shutdown();
    assert!(server.is_shut_down());

    assert_eq!(next(&mut changes).await, (false, alice.server_node().clone()));
    assert!(!alice.is_connected());

    // Sending after disconnect is a no-op
    alice.broadcast(Payload::text("late")).unwrap();
}
