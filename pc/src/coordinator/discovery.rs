//! Discovery: find the channel whose device acknowledges a probe

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::{Coordinator, require_non_empty};
use super::guard::ListenerGuard;
use crate::channel::{Channel, Listener, ListenerId};
use crate::error::CoordError;
use crate::gate::ResponseGate;
use crate::retransmit::{CancelSignal, RetransmitTarget};

impl Coordinator {
    /// Probe every channel and return the name of the first one whose reply
    /// equals `ack` byte for byte
    ///
    /// The probe is resent on all channels every interval until a match or the
    /// discovery timeout. Returns `Ok(None)` on timeout. Channels that cannot
    /// be opened are skipped; the call fails only if none could be opened.
    pub async fn discover(&self, probe: &[u8], ack: &[u8]) -> Result<Option<String>, CoordError> {
        self.check_discovery(probe, ack)?;
        self.run_discovery(probe.to_vec(), ack.to_vec()).await
    }

    /// Run discovery in the background and call `on_found` with the matching
    /// channel name
    ///
    /// Arguments are validated before this returns. The task resolves to the
    /// same value [`discover`](Self::discover) would have returned; errors
    /// after validation are logged and resolve to `None`.
    pub fn discover_with<F>(&self, probe: &[u8], ack: &[u8], on_found: F) -> Result<JoinHandle<Option<String>>, CoordError>
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.check_discovery(probe, ack)?;

        let this = self.clone();
        let probe = probe.to_vec();
        let ack = ack.to_vec();
        Ok(tokio::spawn(async move {
            match this.run_discovery(probe, ack).await {
                Ok(Some(name)) => {
                    on_found(&name);
                    Some(name)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "Background discovery failed");
                    None
                }
            }
        }))
    }

    fn check_discovery(&self, probe: &[u8], ack: &[u8]) -> Result<(), CoordError> {
        self.config.validate()?;
        require_non_empty("probe", probe)?;
        require_non_empty("acknowledgement", ack)?;
        if self.directory.is_empty() {
            return Err(CoordError::config("no channels available for discovery"));
        }
        Ok(())
    }

    async fn run_discovery(&self, probe: Vec<u8>, ack: Vec<u8>) -> Result<Option<String>, CoordError> {
        let channels = self.open_all().await?;

        let gate = Arc::new(ResponseGate::new());
        let cancel = CancelSignal::new();
        let ack: Arc<[u8]> = ack.into();

        let mut guards = Vec::with_capacity(channels.len());
        let mut targets = Vec::with_capacity(channels.len());
        for (name, channel) in channels {
            let id = ListenerId::new();
            let listener = ack_listener(name, ack.clone(), gate.clone(), cancel.clone());
            guards.push(ListenerGuard::register(channel.clone(), id, listener));
            targets.push(RetransmitTarget::new(channel).with_listener(id));
        }

        let timeout = self.config.discovery_timeout();
        info!(channels = targets.len(), ?timeout, "Discovery started");
        let retransmit = self.retransmitter().spawn(probe, targets, cancel);

        let found = gate.wait(timeout).await;

        for guard in &mut guards {
            if !guard.release() {
                debug!(listener_id = %guard.id(), "Discovery listener already removed");
            }
        }
        let rounds = retransmit.shutdown(self.config.shutdown_grace()).await;

        match &found {
            Some(name) => info!(channel = %name, rounds, "Discovery found device"),
            None => info!(?timeout, rounds, "Discovery timed out"),
        }
        Ok(found)
    }

    /// Open every channel concurrently, keeping the ones that opened
    async fn open_all(&self) -> Result<Vec<(String, Arc<dyn Channel>)>, CoordError> {
        let attempts = self.directory.iter().map(|(name, channel)| async move {
            let result = self.ensure_open(channel).await;
            (name.to_string(), Arc::clone(channel), result)
        });

        let mut opened = Vec::new();
        let mut last_error = None;
        for (name, channel, result) in join_all(attempts).await {
            match result {
                Ok(()) => opened.push((name, channel)),
                Err(e) => {
                    warn!(channel = %name, error = %e, "Skipping channel that failed to open");
                    last_error = Some(e);
                }
            }
        }

        if opened.is_empty()
            && let Some(e) = last_error
        {
            return Err(e.into());
        }
        Ok(opened)
    }
}

/// Listener matching replies against the expected acknowledgement
///
/// The gate picks the winner when several channels match at once.
fn ack_listener(name: String, ack: Arc<[u8]>, gate: Arc<ResponseGate<String>>, cancel: CancelSignal) -> Listener {
    Listener::new(move |data| {
        if data != &ack[..] {
            debug!(
                channel = %name,
                received = %String::from_utf8_lossy(data),
                expected = %String::from_utf8_lossy(&ack),
                "Discovery reply does not match acknowledgement"
            );
            return Ok(());
        }
        if gate.signal(name.clone()) {
            debug!(channel = %name, "Discovery acknowledgement matched");
            cancel.cancel();
        }
        Ok(())
    })
}
