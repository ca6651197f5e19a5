//! Listener registry used by the document store.
//!
//! `EventBus<E>` delivers every emitted event to all current subscribers.
//! A [`Subscription`] is the disposer: hold it to keep receiving events, drop
//! it to unsubscribe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Object-safe view of a bus so subscriptions need not know the event type.
trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Event bus for publishing events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let bus: Arc<dyn Unsubscribe> = self.clone();
        Subscription {
            bus: Arc::downgrade(&bus),
            id,
        }
    }

    /// Subscribe only to events accepted by `filter`.
    pub fn subscribe_filtered(
        self: &Arc<Self>,
        filter: impl Fn(&E) -> bool + Send + Sync + 'static,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(move |event| {
            if filter(event) {
                callback(event);
            }
        })
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: &E) {
        // Clone the callback list so a callback may subscribe or unsubscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E: 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }
}
