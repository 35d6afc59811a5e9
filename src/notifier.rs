//! In-process publish/subscribe registry.
//!
//! Each component owns the notifiers for the events it emits; there is no
//! global registry. `subscribe` hands back a [`Subscription`] that removes the
//! handler when dropped.
//!
//! Handlers run synchronously inside `notify`, with the registry unlocked, so a
//! handler may subscribe, unsubscribe or trigger further notifications on the
//! same notifier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler<E>)>>,
}

pub struct Notifier<E> {
    registry: Arc<Registry<E>>,
}

impl<E: 'static> Notifier<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(handler))
    }

    pub fn subscribe_arc(&self, handler: Handler<E>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.lock().push((id, handler));

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.handlers.lock().retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    /// Call every registered handler with `event`.
    pub fn notify(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .registry
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("handlers", &self.registry.handlers.lock().len())
            .finish()
    }
}

/// Capability token for one registered handler.
///
/// Dropping it unregisters the handler. [`Subscription::detach`] keeps the
/// handler registered for as long as the notifier lives.
#[must_use = "dropping a Subscription unregisters its handler immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn detach(mut self) {
        self.release = None;
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
