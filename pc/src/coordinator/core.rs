//! Coordinator handle and fire-and-forget sends

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelDirectory, OpenOptions};
use crate::config::{Config, CoordinatorConfig, SerialSettings};
use crate::error::{ChannelError, CoordError};
use crate::retransmit::Retransmitter;

/// Entry point for discovery and request/response exchanges
///
/// Cheap to clone; clones share the same directory and configuration.
/// Exchanges spawn tokio tasks, so methods must be called from within a
/// tokio runtime.
#[derive(Clone)]
pub struct Coordinator {
    pub(super) directory: Arc<ChannelDirectory>,
    pub(super) config: Arc<CoordinatorConfig>,
    serial: SerialSettings,
}

impl Coordinator {
    /// Create a coordinator over a populated channel directory
    ///
    /// Timings are checked by every exchange before any I/O, so an invalid
    /// `config` surfaces as [`CoordError::Configuration`] from the first call.
    pub fn new(directory: ChannelDirectory, config: CoordinatorConfig) -> Self {
        debug!(channels = directory.len(), ?config, "Coordinator::new: called");
        if let Err(e) = config.validate() {
            warn!(error = %e, "Coordinator created with invalid timings");
        }
        Self {
            directory: Arc::new(directory),
            config: Arc::new(config),
            serial: SerialSettings::default(),
        }
    }

    /// Create a coordinator using the coordinator and serial sections of `config`
    pub fn from_config(directory: ChannelDirectory, config: &Config) -> Self {
        Self::new(directory, config.coordinator.clone()).with_serial(config.serial.clone())
    }

    /// Line parameters used when this coordinator opens a channel
    pub fn with_serial(mut self, serial: SerialSettings) -> Self {
        self.serial = serial;
        self
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.directory
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Send a payload once, without waiting for any response
    pub async fn send(&self, name: &str, payload: &[u8]) -> Result<(), CoordError> {
        debug!(channel = %name, bytes = payload.len(), "Coordinator::send: called");
        require_non_empty("payload", payload)?;
        let channel = self.directory.get(name)?;

        self.ensure_open(&channel).await?;
        channel.send(payload).await?;
        Ok(())
    }

    /// Send a payload with retransmission and hand the reply to `on_response`
    ///
    /// Validation happens before this returns; the exchange itself runs in the
    /// background, bounded by the configured callback timeout. The callback is
    /// not called if no reply arrives in time.
    pub fn send_with<F>(&self, name: &str, payload: &[u8], on_response: F) -> Result<JoinHandle<()>, CoordError>
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        debug!(channel = %name, bytes = payload.len(), "Coordinator::send_with: called");
        self.config.validate()?;
        require_non_empty("payload", payload)?;
        let channel = self.directory.get(name)?;

        let this = self.clone();
        let payload = payload.to_vec();
        let timeout = self.config.callback_timeout();
        Ok(tokio::spawn(async move {
            let name = channel.name().to_string();
            match this.exchange(channel, payload, timeout).await {
                Ok(Some(response)) => on_response(response),
                Ok(None) => info!(channel = %name, ?timeout, "No response before timeout"),
                Err(e) => warn!(channel = %name, error = %e, "Background exchange failed"),
            }
        }))
    }

    pub(super) fn open_options(&self) -> OpenOptions {
        OpenOptions::new(self.config.open_timeout()).with_serial(self.serial.clone())
    }

    pub(super) fn retransmitter(&self) -> Retransmitter {
        Retransmitter::new(self.config.retransmit_interval())
    }

    pub(super) async fn ensure_open(&self, channel: &Arc<dyn Channel>) -> Result<(), ChannelError> {
        if channel.is_open() {
            return Ok(());
        }
        debug!(channel = %channel.name(), "Coordinator::ensure_open: opening");
        channel.open(&self.open_options()).await
    }
}

pub(super) fn require_non_empty(what: &str, data: &[u8]) -> Result<(), CoordError> {
    if data.is_empty() {
        return Err(CoordError::config(format!("{what} must not be empty")));
    }
    Ok(())
}
