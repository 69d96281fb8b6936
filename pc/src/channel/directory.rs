//! Directory of the channels available to the coordinators

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::Channel;
use crate::error::CoordError;

/// Name-keyed set of channels
///
/// Built once by whatever enumerates the host's ports and then shared,
/// read-only, with the coordinators.
#[derive(Clone, Default)]
pub struct ChannelDirectory {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory keyed by each channel's name
    pub fn from_channels<I>(channels: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Channel>>,
    {
        let mut directory = Self::new();
        for channel in channels {
            directory.insert(channel);
        }
        debug!(count = directory.len(), "ChannelDirectory::from_channels: built");
        directory
    }

    /// Add a channel, replacing any channel with the same name
    pub fn insert(&mut self, channel: Arc<dyn Channel>) -> Option<Arc<dyn Channel>> {
        let name = channel.name().to_string();
        let previous = self.channels.insert(name.clone(), channel);
        if previous.is_some() {
            warn!(channel = %name, "Replacing channel with duplicate name");
        }
        previous
    }

    /// Look up a channel by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Channel>, CoordError> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| CoordError::UnknownChannel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn list_channels(&self) -> &HashMap<String, Arc<dyn Channel>> {
        &self.channels
    }

    /// Channel names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Channel>)> {
        self.channels.iter().map(|(name, channel)| (name.as_str(), channel))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[test]
    fn test_directory_lookup() {
        let directory = ChannelDirectory::from_channels([
            MemoryChannel::builder("COM2").build() as Arc<dyn Channel>,
            MemoryChannel::builder("COM1").build() as Arc<dyn Channel>,
        ]);

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.names(), vec!["COM1".to_string(), "COM2".to_string()]);
        assert!(directory.contains("COM1"));
        assert_eq!(directory.get("COM2").unwrap().name(), "COM2");
    }

    #[test]
    fn test_unknown_channel() {
        let directory = ChannelDirectory::new();
        assert!(directory.is_empty());

        let err = directory.get("no-such-device").err().unwrap();
        assert!(err.is_unknown_channel());
        assert!(err.to_string().contains("no-such-device"));
    }

    #[test]
    fn test_insert_replaces_duplicate_name() {
        let mut directory = ChannelDirectory::new();
        assert!(directory.insert(MemoryChannel::builder("COM1").build()).is_none());
        assert!(directory.insert(MemoryChannel::builder("COM1").build()).is_some());
        assert_eq!(directory.len(), 1);
    }
}
