//! One-shot gates.
//!
//! A [`Gate`] blocks any number of waiters until it is fired, exactly once.
//! Firing is idempotent and waking is immediate for every current and future
//! waiter. Connections use gates to tell their reader, writer and credential
//! tasks that the connection is gone.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable one-shot signal
#[derive(Debug, Clone)]
pub struct Gate {
    signal: Arc<watch::Sender<bool>>,
}

impl Gate {
    /// Create an unfired gate
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self { signal: Arc::new(signal) }
    }

    /// Fire the gate. Returns `true` for the call that actually fired it.
    pub fn fire(&self) -> bool {
        self.signal.send_if_modified(|fired| !std::mem::replace(fired, true))
    }

    /// True once fired
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.signal.borrow()
    }

    /// Wait until the gate is fired
    pub async fn wait(&self) {
        let mut receiver = self.signal.subscribe();
        // The sender lives as long as `self`, so this only returns once fired
        let _ = receiver.wait_for(|fired| *fired).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
