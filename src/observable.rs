//! Reactive cells and emitters with synchronous listener dispatch.
//!
//! Utterance priorities and can-announce gates are modelled as small
//! observable values ([`ObservableCell`]); announcement lifecycle events are
//! delivered through [`Emitter`]s. Both dispatch synchronously on the calling
//! thread, and both tolerate listeners that re-enter the queue or adapter
//! APIs: the listener registry lock is released before any callback runs, and
//! dispatch iterates a snapshot of the registry, so callbacks may freely
//! subscribe, unsubscribe, or fire further notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Lock a mutex, absorbing poisoning.
///
/// A panicking listener must not wedge every later queue operation.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Subscription ───────────────────────────────────────────────────

/// RAII handle for a registered listener.
///
/// Dropping the subscription detaches the listener. [`detach`](Self::detach)
/// does the same thing with a name that reads better at call sites.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detach the listener now.
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.cancel.is_some())
            .finish()
    }
}

// ── Listener registry (shared by cells and emitters) ───────────────

struct ListenerSlot<F: ?Sized> {
    id: u64,
    callback: Arc<F>,
}

struct Registry<F: ?Sized> {
    listeners: Mutex<Vec<ListenerSlot<F>>>,
    next_id: AtomicU64,
}

impl<F: ?Sized> Registry<F> {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn add(registry: &Arc<Self>, callback: Arc<F>) -> Subscription
    where
        F: Send + Sync + 'static,
    {
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&registry.listeners).push(ListenerSlot { id, callback });

        let weak = Arc::downgrade(registry);
        Subscription::new(move || {
            if let Some(registry) = Weak::upgrade(&weak) {
                lock(&registry.listeners).retain(|slot| slot.id != id);
            }
        })
    }

    /// Snapshot the current listeners so dispatch runs lock-free.
    fn snapshot(&self) -> Vec<Arc<F>> {
        lock(&self.listeners)
            .iter()
            .map(|slot| Arc::clone(&slot.callback))
            .collect()
    }

    fn len(&self) -> usize {
        lock(&self.listeners).len()
    }
}

// ── ObservableCell ─────────────────────────────────────────────────

type CellListener<T> = dyn Fn(&T, &T) + Send + Sync;

struct CellShared<T> {
    value: Mutex<T>,
    registry: Arc<Registry<CellListener<T>>>,
}

/// A mutable observable value with synchronous change notification.
///
/// Handles are cheap clones sharing one value, in the manner of a shared
/// flag: cloning an `ObservableCell` never copies the value or the listener
/// registry. Listeners receive `(new, old)` and run on the thread that called
/// [`set`](Self::set), after the value has been swapped in.
pub struct ObservableCell<T> {
    shared: Arc<CellShared<T>>,
}

impl<T> Clone for ObservableCell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableCell<T> {
    /// Create a cell holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(CellShared {
                value: Mutex::new(value),
                registry: Arc::new(Registry::new()),
            }),
        }
    }

    /// Current value (cloned out).
    #[must_use]
    pub fn get(&self) -> T {
        lock(&self.shared.value).clone()
    }

    /// Replace the value, notifying listeners when it actually changed.
    pub fn set(&self, value: T) {
        let old = {
            let mut guard = lock(&self.shared.value);
            if *guard == value {
                return;
            }
            std::mem::replace(&mut *guard, value.clone())
        };

        for listener in self.shared.registry.snapshot() {
            (*listener)(&value, &old);
        }
    }

    /// Register a change listener. The listener stays attached until the
    /// returned [`Subscription`] is dropped.
    #[must_use]
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        Registry::add(&self.shared.registry, Arc::new(listener))
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether two handles observe the same underlying value.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObservableCell")
            .field(&*lock(&self.shared.value))
            .finish()
    }
}

// ── Emitter ────────────────────────────────────────────────────────

type EmitterListener<T> = dyn Fn(&T) + Send + Sync;

/// A multi-listener event channel with synchronous dispatch.
///
/// Unlike a broadcast channel there is no buffering and no polling: every
/// listener runs before [`emit`](Self::emit) returns, which is what the queue
/// relies on for completion bookkeeping.
pub struct Emitter<T> {
    registry: Arc<Registry<EmitterListener<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Emitter<T> {
    /// Create an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
        }
    }

    /// Dispatch `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &T) {
        for listener in self.registry.snapshot() {
            (*listener)(event);
        }
    }

    /// Register a listener. It stays attached until the returned
    /// [`Subscription`] is dropped.
    #[must_use]
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        Registry::add(&self.registry, Arc::new(listener))
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.registry.len())
            .finish()
    }
}
