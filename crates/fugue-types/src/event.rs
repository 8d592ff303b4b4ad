//! Callback registries for typed event streams.
//!
//! A component owns one [`Observers<E>`] per event kind and calls
//! [`Observers::emit`]. Consumers register a closure and keep the returned
//! [`Subscription`]; dropping it unregisters the closure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Shared event handler
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, Handler<E>)>>,
}

/// Set of handlers for one event kind
pub struct Observers<E> {
    registry: Arc<Registry<E>>,
}

impl<E: 'static> Observers<E> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a closure.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_handler(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn subscribe_handler(&self, handler: Handler<E>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.write().push((id, handler));

        let weak: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.handlers.write().retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    /// Deliver `event` to every handler.
    pub fn emit(&self, event: &E) {
        // Handlers may subscribe or unsubscribe re-entrantly
        let handlers: Vec<Handler<E>> = self
            .registry
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.registry.handlers.read().len()
    }

    /// True if nobody is listening
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Observers<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Unsubscribe token. Dropping it removes the handler.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keep the handler registered for the registry's lifetime.
    pub fn detach(mut self) {
        self.unsubscribe.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_subscribers() {
        let observers = Observers::<u32>::new();
        let sum = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&sum);
        let _sub = observers.subscribe(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });

        observers.emit(&3);
        observers.emit(&4);
        assert_eq!(sum.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let observers = Observers::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = observers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        observers.emit(&());
        drop(sub);
        observers.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_detach_keeps_handler() {
        let observers = Observers::<()>::new();
        observers.subscribe(|_| {}).detach();
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let observers = Observers::<()>::new();
        let sub = observers.subscribe(|_| {});
        drop(observers);
        drop(sub);
    }

    #[test]
    fn test_clones_share_handlers() {
        let observers = Observers::<()>::new();
        let clone = observers.clone();
        let _sub = clone.subscribe(|_| {});
        assert_eq!(observers.len(), 1);
    }
}
