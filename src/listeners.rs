//! Typed callback registries.
//!
//! Every notification source in the engine (circuit structure changes,
//! simulator events) owns a [`Listeners`] registry. Registration hands back a
//! [`ListenerId`] token that removes exactly that callback again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token identifying one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A registry of callbacks for events of type `E`.
pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Listeners<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback.
    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Unregister a callback. Returns false if the token was unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in registration order.
    ///
    /// The registry lock is released before the callbacks run, so a callback
    /// may register or unregister listeners.
    pub fn fire(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Callback<E>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fire_and_remove() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let a = listeners.add(move |e| {
            t.fetch_add(*e as usize, Ordering::SeqCst);
        });
        let t = total.clone();
        let _b = listeners.add(move |e| {
            t.fetch_add(10 * *e as usize, Ordering::SeqCst);
        });

        listeners.fire(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);

        assert!(listeners.remove(a));
        assert!(!listeners.remove(a));
        listeners.fire(&1);
        assert_eq!(total.load(Ordering::SeqCst), 32);
        assert_eq!(listeners.len(), 1);
    }
}
