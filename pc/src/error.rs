//! Error types for channels and coordinators

use thiserror::Error;

/// Errors raised by a channel transport
///
/// Every variant carries the name of the channel it came from so failures
/// stay attributable once they bubble up through a coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to open channel {channel}: {reason}")]
    Open { channel: String, reason: String },

    #[error("Failed to write to channel {channel}: {reason}")]
    Write { channel: String, reason: String },

    #[error("Channel {channel} is not open")]
    NotOpen { channel: String },

    #[error("Channel {channel} is closed")]
    Closed { channel: String },
}

impl ChannelError {
    /// Name of the channel this error belongs to
    pub fn channel(&self) -> &str {
        match self {
            ChannelError::Open { channel, .. }
            | ChannelError::Write { channel, .. }
            | ChannelError::NotOpen { channel }
            | ChannelError::Closed { channel } => channel,
        }
    }

    /// Check if this error happened while opening the channel
    pub fn is_open_failure(&self) -> bool {
        matches!(self, ChannelError::Open { .. } | ChannelError::Closed { .. })
    }
}

/// Errors surfaced by the coordinator API
///
/// A timeout is not represented here: coordinators return `Ok(None)` when no
/// response arrives in time.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl CoordError {
    /// Check if this is a configuration error (rejected before any I/O)
    pub fn is_configuration(&self) -> bool {
        matches!(self, CoordError::Configuration(_))
    }

    /// Check if the requested channel was missing from the directory
    pub fn is_unknown_channel(&self) -> bool {
        matches!(self, CoordError::UnknownChannel(_))
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        CoordError::Configuration(message.into())
    }
}
