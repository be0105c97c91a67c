//! Observer Registry
//!
//! `Registry<E>` holds a set of callbacks for one event type and fans each
//! emitted event out to all of them. Registration returns a
//! [`HandlerHandle`] that removes exactly that callback; multiple
//! independent consumers can observe the same source without clobbering
//! each other.
//!
//! Emission clones the callback list out from under the lock before
//! invoking, so a handler may register or unregister handlers (including
//! itself) without deadlocking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct RegistryInner<E> {
    handlers: RwLock<BTreeMap<u64, Callback<E>>>,
    next_id: AtomicU64,
}

/// A set of callbacks for one event type.
pub struct Registry<E> {
    inner: Arc<RegistryInner<E>>,
}

impl<E> Clone for Registry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for Registry<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                handlers: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<E> Registry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. The callback stays registered until the
    /// returned handle is unregistered or the registry is cleared.
    pub fn register<F>(&self, callback: F) -> HandlerHandle<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.write().insert(id, Arc::new(callback));
        HandlerHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every registered callback, in registration
    /// order.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self.inner.handlers.read().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.handlers.read().is_empty()
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.inner.handlers.write().clear();
    }
}

/// Removes one callback from the registry that produced it.
pub struct HandlerHandle<E> {
    id: u64,
    registry: Weak<RegistryInner<E>>,
}

impl<E> HandlerHandle<E> {
    /// Remove the callback. Safe to call after the registry is gone.
    pub fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.write().remove(&self.id);
        }
    }
}

impl<E> std::fmt::Debug for HandlerHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerHandle").field("id", &self.id).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn fans_out_to_all_handlers() {
        let registry: Registry<u32> = Registry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Dropping a handle does not unregister; only an explicit call does.
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            drop(registry.register(move |value: &u32| {
                seen.lock().unwrap().push((tag, *value));
            }));
        }

        registry.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unregister_removes_only_that_handler() {
        let registry: Registry<u32> = Registry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = Arc::clone(&seen);
            registry.register(move |value: &u32| seen.lock().unwrap().push(("first", *value)))
        };
        let _second = {
            let seen = Arc::clone(&seen);
            registry.register(move |value: &u32| seen.lock().unwrap().push(("second", *value)))
        };

        first.unregister();
        registry.emit(&1);

        assert_eq!(*seen.lock().unwrap(), vec![("second", 1)]);
    }

    #[test]
    fn handler_may_unregister_itself_during_emit() {
        let registry: Registry<u32> = Registry::new();
        let count = Arc::new(Mutex::new(0_u32));

        let slot: Arc<Mutex<Option<HandlerHandle<u32>>>> = Arc::new(Mutex::new(None));
        let handle = {
            let count = Arc::clone(&count);
            let slot = Arc::clone(&slot);
            registry.register(move |_: &u32| {
                *count.lock().unwrap() += 1;
                if let Some(handle) = slot.lock().unwrap().take() {
                    handle.unregister();
                }
            })
        };
        *slot.lock().unwrap() = Some(handle);

        registry.emit(&0);
        registry.emit(&0);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn unregister_after_registry_dropped_is_harmless() {
        let registry: Registry<u32> = Registry::new();
        let handle = registry.register(|_| {});
        drop(registry);
        handle.unregister();
    }

    #[test]
    fn clear_empties_the_registry() {
        let registry: Registry<u32> = Registry::new();
        let _handle = registry.register(|_| {});
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
