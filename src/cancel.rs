//! Cooperative cancellation
//!
//! A small cancellation token threaded through the retry loop and the
//! stream consumer. Cancellation is level-triggered: once cancelled, a
//! token stays cancelled, and every clone observes it.

use std::sync::Arc;

use tokio::sync::watch;

/// Clonable cancellation token.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a live token.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel; wakes every task waiting in [`CancelToken::cancelled`].
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender side gone without cancelling; treat as cancelled so
                // waiters do not hang forever.
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
