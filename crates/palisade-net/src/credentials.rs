//! Credential hand-off.
//!
//! An interactive prompt may take as long as a human does. It runs on a
//! blocking worker; a watcher task waits for either its answer or the
//! connection's closed gate, whichever comes first. The answer goes back to
//! the decoder through the ingress queue, so the decoder itself never waits
//! and other connections keep flowing.
//!
//! If the connection closes first the watcher returns at once and the answer,
//! whenever it comes, is dropped.

use std::sync::Arc;

use palisade_core::{CredentialPrompt, HandshakeError};
use palisade_proto::Properties;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{decoder::Ingress, gate::Gate, registry::ConnectionId};

pub(crate) fn collect(
    id: ConnectionId,
    challenge: Properties,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    closed: Gate,
    ingress: mpsc::UnboundedSender<Ingress>,
) {
    let Some(prompt) = prompt else {
        debug!(connection = %id, "challenged without a credential prompt");
        let _ = ingress.send(Ingress::Credentials { id, response: Ok(None) });
        return;
    };

    let (answer, answered) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let _ = answer.send(prompt.collect(&challenge));
    });

    tokio::spawn(async move {
        let response = tokio::select! {
            biased;
            () = closed.wait() => {
                debug!(connection = %id, "credential collection cancelled");
                return;
            },
            answer = answered => answer.map_err(|_| HandshakeError::Cancelled),
        };
        let _ = ingress.send(Ingress::Credentials { id, response });
    });
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc as std_mpsc, time::Duration};

    use super::*;

    fn challenge() -> Properties {
        Properties::from([("nonce".to_string(), "1".to_string())])
    }

    async fn next(queue: &mut mpsc::UnboundedReceiver<Ingress>) -> Option<Ingress> {
        tokio::time::timeout(Duration::from_secs(5), queue.recv()).await.unwrap()
    }

    #[tokio::test]
    async fn answer_is_queued() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let prompt: Arc<dyn CredentialPrompt> = Arc::new(|challenge: &Properties| -> Option<Properties> {
            let mut response = challenge.clone();
            response.insert("password".into(), "hunter2".into());
            Some(response)
        });

        collect(ConnectionId::from_raw(3), challenge(), Some(prompt), Gate::new(), tx);

        match next(&mut rx).await {
            Some(Ingress::Credentials { id, response: Ok(Some(map)) }) => {
                assert_eq!(id, ConnectionId::from_raw(3));
                assert_eq!(map.get("password").map(String::as_str), Some("hunter2"));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_prompt_abandons() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        collect(ConnectionId::from_raw(3), challenge(), None, Gate::new(), tx);
        assert!(matches!(next(&mut rx).await, Some(Ingress::Credentials { response: Ok(None), .. })));
    }

    #[tokio::test]
    async fn closing_unblocks_without_an_answer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (release, blocked) = std_mpsc::channel::<()>();
        let blocked = std::sync::Mutex::new(blocked);
        let prompt: Arc<dyn CredentialPrompt> = Arc::new(move |_: &Properties| -> Option<Properties> {
            let _ = blocked.lock().unwrap().recv();
            None
        });
        let closed = Gate::new();

        collect(ConnectionId::from_raw(3), challenge(), Some(prompt), closed.clone(), tx);
        closed.fire();

        // Watcher exits without queueing anything while the prompt still blocks
        assert!(next(&mut rx).await.is_none());
        release.send(()).unwrap();
    }
}
