//! Typed event channels.
//!
//! A [`Signal`] fans one value out to every listener connected to it. The
//! grid uses one signal for its public event stream and the store uses one
//! to announce settled commits.
//!
//! Listeners run synchronously on the emitting thread in the order they were
//! connected. The listener list is snapshotted before delivery, so a listener
//! may connect, disconnect or emit again on the same signal; changes to the
//! list are seen by the next emit.
//!
//! ```
//! use horizon_grid_core::Signal;
//!
//! let page_changed = Signal::<usize>::new();
//! let id = page_changed.connect(|page| println!("now on page {page}"));
//! page_changed.emit(3);
//! assert!(page_changed.disconnect(id));
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::error::SignalError;
use crate::logging::targets;

new_key_type! {
    /// Handle to one listener of a [`Signal`].
    pub struct ConnectionId;
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Listeners plus the order they were connected in. Slot map iteration order
/// is not insertion order once keys get reused.
struct Listeners<T> {
    by_id: SlotMap<ConnectionId, Listener<T>>,
    order: Vec<ConnectionId>,
}

impl<T> Listeners<T> {
    fn snapshot(&self) -> Vec<Listener<T>> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(*id).cloned())
            .collect()
    }

    fn remove(&mut self, id: ConnectionId) -> bool {
        if self.by_id.remove(id).is_none() {
            return false;
        }
        self.order.retain(|other| *other != id);
        true
    }
}

/// Broadcasts values of type `T` to connected listeners.
pub struct Signal<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.lock().by_id.len())
            .finish()
    }
}

impl<T: 'static> Signal<T> {
    /// Creates a signal with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                by_id: SlotMap::with_key(),
                order: Vec::new(),
            })),
        }
    }

    /// Adds a listener and returns the id that removes it again.
    pub fn connect<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.by_id.insert(Arc::new(listener));
        listeners.order.push(id);
        id
    }

    /// Adds a listener that is removed when the returned guard drops.
    ///
    /// The guard holds the listener list weakly, so dropping it after the
    /// signal is gone is fine.
    pub fn connect_scoped<F>(&self, listener: F) -> ConnectionGuard<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        ConnectionGuard {
            id: self.connect(listener),
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Removes a listener. Returns `false` for an id that is not connected.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.listeners.lock().remove(id)
    }

    /// Like [`disconnect`](Self::disconnect), but an unknown id is an error.
    pub fn try_disconnect(&self, id: ConnectionId) -> Result<(), SignalError> {
        self.disconnect(id)
            .then_some(())
            .ok_or(SignalError::InvalidConnection)
    }

    /// Removes every listener.
    pub fn disconnect_all(&self) {
        let mut listeners = self.listeners.lock();
        listeners.by_id.clear();
        listeners.order.clear();
    }

    /// Number of connected listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().by_id.len()
    }

    /// Delivers `value` to every listener.
    pub fn emit(&self, value: T) {
        let listeners = self.listeners.lock().snapshot();
        tracing::trace!(target: targets::SIGNAL, listeners = listeners.len(), "emit");
        for listener in &listeners {
            listener(&value);
        }
    }

    /// Delivers a sequence of values against a single listener snapshot.
    ///
    /// Every value reaches the same listeners even if one of them connects
    /// or disconnects others midway. Returns how many values were delivered.
    pub fn emit_each<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let listeners = self.listeners.lock().snapshot();
        let mut delivered = 0;
        for value in values {
            for listener in &listeners {
                listener(&value);
            }
            delivered += 1;
        }
        if delivered > 0 {
            tracing::trace!(target: targets::SIGNAL, delivered, listeners = listeners.len(), "emit batch");
        }
        delivered
    }
}

/// Disconnects its listener on drop. Created by [`Signal::connect_scoped`].
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use horizon_grid_core::Signal;
///
/// let signal = Signal::<usize>::new();
/// let total = Arc::new(AtomicUsize::new(0));
/// let guard = {
///     let total = total.clone();
///     signal.connect_scoped(move |n| {
///         total.fetch_add(*n, Ordering::SeqCst);
///     })
/// };
/// signal.emit(5);
/// drop(guard);
/// signal.emit(7);
/// assert_eq!(total.load(Ordering::SeqCst), 5);
/// ```
#[must_use = "the listener is disconnected as soon as the guard is dropped"]
pub struct ConnectionGuard<T> {
    id: ConnectionId,
    listeners: Weak<Mutex<Listeners<T>>>,
}

impl<T> ConnectionGuard<T> {
    /// Id of the guarded listener.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl<T> std::fmt::Debug for ConnectionGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionGuard").field(&self.id).finish()
    }
}

impl<T> Drop for ConnectionGuard<T> {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(self.id);
        }
    }
}

static_assertions::assert_impl_all!(Signal<u64>: Send, Sync);
