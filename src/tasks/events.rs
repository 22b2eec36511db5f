//! Listener registry with dispose-on-drop subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener<E>)>>,
}

/// Broadcasts events to every live subscriber. Cloning shares the listener list.
pub struct EventEmitter<E> {
    inner: Arc<Listeners<E>>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self { inner: Arc::new(Listeners { next_id: AtomicU64::new(0), entries: Mutex::new(Vec::new()) }) }
    }
}

impl<E: 'static> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` until the returned subscription is dropped.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().push((id, Arc::new(listener)));

        let weak: Weak<Listeners<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.entries.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Call every listener. Listeners run outside the lock and may subscribe or dispose.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> =
            self.inner.entries.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

/// Handle to a registered listener; dropping it disposes the listener.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { dispose: Some(Box::new(dispose)) }
    }

    /// Keep the listener registered for the emitter's whole lifetime.
    pub fn detach(mut self) {
        self.dispose.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}
