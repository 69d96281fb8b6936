//! Single-shot, first-wins response gate
//!
//! Bridges asynchronous listener delivery to the coordinator waiting for a
//! result. The first `signal` sets the value; every later one is ignored.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// Holds at most one value for the lifetime of an exchange
pub struct ResponseGate<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> ResponseGate<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Offer a value
    ///
    /// Returns `true` if this call won and set the value, `false` if the gate
    /// was already signaled.
    pub fn signal(&self, value: T) -> bool {
        let mut value = Some(value);
        let won = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = value.take();
                true
            }
        });
        debug!(won, "ResponseGate::signal");
        won
    }

    pub fn is_signaled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Current value without waiting
    pub fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait until signaled or until `timeout` elapses
    ///
    /// Returns the value, or `None` on timeout. Any number of tasks may wait
    /// on the same gate.
    pub async fn wait(&self, timeout: Duration) -> Option<T> {
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => (*value).clone(),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(?timeout, "ResponseGate::wait: timed out");
                None
            }
        }
    }
}

impl<T> Default for ResponseGate<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}
