//! Listener registry.
//!
//! Listeners are kept in registration order. Dispatch always works on a
//! snapshot so that a listener added or removed mid-delivery does not change
//! the delivery pass already in progress.

use crate::event::Event;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A callback receiving decoded events.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Create a listener ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw ID value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener_{}", self.0)
    }
}

/// Ordered set of registered listeners.
#[derive(Default)]
pub struct ListenerSet {
    entries: Vec<(ListenerId, Listener)>,
}

impl ListenerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under `id`.
    ///
    /// Returns `false` if the ID is already registered.
    pub fn insert(&mut self, id: ListenerId, listener: Listener) -> bool {
        if self.contains(id) {
            return false;
        }
        self.entries.push((id, listener));
        debug!(listener = %id, listeners = self.entries.len(), "Listener registered");
        true
    }

    /// Remove the listener registered under `id`.
    ///
    /// Returns `true` if it was registered. Removing twice is harmless.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        let removed = self.entries.len() != before;
        if removed {
            debug!(listener = %id, listeners = self.entries.len(), "Listener removed");
        }
        removed
    }

    /// Check whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }

    /// The registered callbacks, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Listener> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, _)| id))
            .finish()
    }
}
