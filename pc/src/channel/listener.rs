//! Per-channel listener registry
//!
//! Listeners are keyed by a correlation id so an exchange can remove exactly
//! the registration it made. The registry is safe to mutate while the
//! transport is delivering: delivery works on a snapshot taken under the read
//! lock, and a listener removed before its turn in the snapshot is skipped.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque correlation id identifying one listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type ListenerFn = dyn Fn(&[u8]) -> eyre::Result<()> + Send + Sync;

/// Observer invoked with every buffer a channel receives
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> eyre::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, data: &[u8]) -> eyre::Result<()> {
        (self.0)(data)
    }

    /// Check whether two handles point at the same callback
    pub fn ptr_eq(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

struct Entry {
    listener: Listener,
    retired: AtomicBool,
}

/// Concurrent map from correlation id to listener
#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<HashMap<ListenerId, Arc<Entry>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under a freshly generated id
    pub fn register(&self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.insert(id, listener);
        id
    }

    /// Register a listener under a caller-chosen id
    ///
    /// Returns the listener previously held under that id, which is retired
    /// and will not be invoked again.
    pub fn insert(&self, id: ListenerId, listener: Listener) -> Option<Listener> {
        let entry = Arc::new(Entry {
            listener,
            retired: AtomicBool::new(false),
        });
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        debug!(listener_id = %id, replaced = previous.is_some(), "ListenerRegistry::insert");
        previous.map(retire)
    }

    /// Remove a listener
    ///
    /// Idempotent: the first call returns the listener, later calls return
    /// `None`. Deliveries that begin after this returns skip the listener.
    /// A delivery already under way may still run it once, and that
    /// invocation runs to completion.
    pub fn remove(&self, id: &ListenerId) -> Option<Listener> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        debug!(listener_id = %id, removed = removed.is_some(), "ListenerRegistry::remove");
        removed.map(retire)
    }

    pub fn get(&self, id: &ListenerId) -> Option<Listener> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| entry.listener.clone())
    }

    pub fn contains(&self, id: &ListenerId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Copy of the current registrations
    pub fn snapshot(&self) -> HashMap<ListenerId, Listener> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, entry.listener.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a received buffer to every registered listener
    ///
    /// A listener that fails or panics is logged and skipped; the others still
    /// receive the buffer. Returns how many listeners completed successfully.
    pub fn dispatch(&self, channel: &str, data: &[u8]) -> usize {
        let entries: Vec<(ListenerId, Arc<Entry>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        debug!(%channel, bytes = data.len(), listeners = entries.len(), "ListenerRegistry::dispatch");

        let mut delivered = 0;
        for (id, entry) in entries {
            if entry.retired.load(Ordering::Acquire) {
                debug!(%channel, listener_id = %id, "ListenerRegistry::dispatch: skipping removed listener");
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| entry.listener.call(data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(%channel, listener_id = %id, error = %e, "Listener failed to handle received data");
                }
                Err(_) => {
                    warn!(%channel, listener_id = %id, "Listener panicked while handling received data");
                }
            }
        }
        delivered
    }
}

fn retire(entry: Arc<Entry>) -> Listener {
    entry.retired.store(true, Ordering::Release);
    entry.listener.clone()
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry").field("len", &self.len()).finish()
    }
}
