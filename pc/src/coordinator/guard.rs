//! Scoped listener registration

use std::sync::Arc;

use tracing::debug;

use crate::channel::{Channel, Listener, ListenerId};

/// Keeps a listener registered on a channel until released or dropped
pub(crate) struct ListenerGuard {
    channel: Arc<dyn Channel>,
    id: ListenerId,
    released: bool,
}

impl ListenerGuard {
    pub(crate) fn register(channel: Arc<dyn Channel>, id: ListenerId, listener: Listener) -> Self {
        debug!(channel = %channel.name(), listener_id = %id, "ListenerGuard::register");
        channel.add_listener(id, listener);
        Self {
            channel,
            id,
            released: false,
        }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener now
    ///
    /// Returns `true` if this call removed it, `false` if it was already gone
    /// (a one-shot listener removes itself when it fires).
    pub(crate) fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.channel.remove_listener(&self.id).is_some()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.release();
    }
}
