//! Listener sets keyed by identity.
//!
//! Registering the same `Arc` twice is a no-op. Emission is synchronous and
//! runs outside the lock, so a listener may add or remove listeners.

use std::sync::Arc;

use parking_lot::RwLock;

/// A callback receiving values of type `T`.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Set of listeners with identity semantics.
pub struct ListenerSet<T> {
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T> ListenerSet<T> {
    /// Empty set.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Add a listener. Returns `false` if it was already registered.
    pub fn add(&self, listener: Listener<T>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Listener<T>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Call every listener in registration order.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self.listeners.read().clone();
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
