//! Correlated request/response on a known channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info};

use super::core::{Coordinator, require_non_empty};
use super::guard::ListenerGuard;
use crate::channel::{Channel, Listener, ListenerId};
use crate::error::CoordError;
use crate::gate::ResponseGate;
use crate::retransmit::{CancelSignal, RetransmitTarget};

impl Coordinator {
    /// Send `payload` on channel `name` and wait for the reply
    ///
    /// The payload is retransmitted every interval until a reply arrives or
    /// the timeout elapses. Negative timeouts use the configured default and
    /// large ones are clamped to the configured maximum. Returns `Ok(None)`
    /// when nothing arrives in time.
    pub async fn request(&self, name: &str, payload: &[u8], timeout_ms: i64) -> Result<Option<Vec<u8>>, CoordError> {
        debug!(channel = %name, bytes = payload.len(), %timeout_ms, "Coordinator::request: called");
        self.config.validate()?;
        require_non_empty("payload", payload)?;
        let channel = self.directory.get(name)?;
        let timeout = self.config.clamp_request_timeout(timeout_ms);

        self.exchange(channel, payload.to_vec(), timeout).await
    }

    pub(super) async fn exchange(
        &self,
        channel: Arc<dyn Channel>,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, CoordError> {
        self.ensure_open(&channel).await?;

        let gate = Arc::new(ResponseGate::new());
        let cancel = CancelSignal::new();
        let id = ListenerId::new();
        let listener = reply_listener(Arc::downgrade(&channel), id, gate.clone(), cancel.clone());

        let mut guard = ListenerGuard::register(channel.clone(), id, listener);
        let retransmit = self.retransmitter().spawn(
            payload,
            vec![RetransmitTarget::new(channel.clone()).with_listener(id)],
            cancel,
        );

        let response = gate.wait(timeout).await;

        // Remove before looking at anything else; a reply racing the timeout
        // is discarded.
        guard.release();
        let rounds = retransmit.shutdown(self.config.shutdown_grace()).await;

        let name = channel.name();
        match &response {
            Some(data) => debug!(channel = %name, listener_id = %id, bytes = data.len(), rounds, "Received response"),
            None => {
                if gate.is_signaled() {
                    debug!(channel = %name, listener_id = %id, "Discarding response that arrived after timeout");
                }
                info!(channel = %name, listener_id = %id, ?timeout, rounds, "No response before timeout");
            }
        }
        Ok(response)
    }
}

/// One-shot listener: the first buffer removes the listener, fills the gate
/// and stops retransmission; anything after that is ignored
fn reply_listener(
    channel: Weak<dyn Channel>,
    id: ListenerId,
    gate: Arc<ResponseGate<Vec<u8>>>,
    cancel: CancelSignal,
) -> Listener {
    let fired = AtomicBool::new(false);
    Listener::new(move |data| {
        if fired.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(channel) = channel.upgrade() {
            channel.remove_listener(&id);
        }
        gate.signal(data.to_vec());
        cancel.cancel();
        Ok(())
    })
}
