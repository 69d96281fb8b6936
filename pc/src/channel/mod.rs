//! Channel capability consumed by the coordinators
//!
//! A channel is a named byte transport to one device. The transport itself
//! (port handles, framing, native buffering) lives outside this crate; it only
//! has to implement [`Channel`] and hand every received buffer to
//! [`ListenerRegistry::dispatch`].

mod directory;
mod listener;
mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SerialSettings;
use crate::error::ChannelError;

pub use directory::ChannelDirectory;
pub use listener::{Listener, ListenerId, ListenerRegistry};
pub use memory::{MemoryChannel, MemoryChannelBuilder, Responder};

/// Lifecycle of a channel; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    Open,
    Closed,
}

/// Parameters for opening a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Bound on how long the transport may take to open
    pub timeout: Duration,

    /// Line parameters
    pub serial: SerialSettings,
}

impl OpenOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            serial: SerialSettings::default(),
        }
    }

    pub fn with_serial(mut self, serial: SerialSettings) -> Self {
        self.serial = serial;
        self
    }
}

/// Byte transport to one device
///
/// Implementations must invoke every registered listener with each received
/// buffer, normally by calling `self.listeners().dispatch(..)`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name, e.g. `/dev/ttyUSB0` or `COM3`
    fn name(&self) -> &str;

    /// Open the channel
    ///
    /// Idempotent when already open. Must fail within `options.timeout`.
    async fn open(&self, options: &OpenOptions) -> Result<(), ChannelError>;

    /// Close the channel; a closed channel cannot be reopened
    async fn close(&self) -> Result<(), ChannelError>;

    /// Write a buffer; fails when the channel is not open
    async fn send(&self, data: &[u8]) -> Result<(), ChannelError>;

    fn state(&self) -> ChannelState;

    /// Registry of listeners attached to this channel
    fn listeners(&self) -> &ListenerRegistry;

    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    fn add_listener(&self, id: ListenerId, listener: Listener) -> Option<Listener> {
        self.listeners().insert(id, listener)
    }

    fn remove_listener(&self, id: &ListenerId) -> Option<Listener> {
        self.listeners().remove(id)
    }

    fn get_listener(&self, id: &ListenerId) -> Option<Listener> {
        self.listeners().get(id)
    }

    fn list_listeners(&self) -> HashMap<ListenerId, Listener> {
        self.listeners().snapshot()
    }
}
