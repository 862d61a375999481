//! Single-writer state container with selector subscriptions.
//!
//! A [`Store<S>`] holds the canonical snapshot of some state `S` behind an
//! `Arc`. Readers get a cheap clone of the current `Arc`; writers go through
//! [`Store::set_state`] with a functional updater `prev -> next`, so several
//! writes in the same tick compose instead of overwriting each other.
//!
//! # Commit cycle
//!
//! Writes are grouped into batches. When the outermost batch ends (a bare
//! `set_state` is a batch of one), the store *flushes*:
//!
//! 1. Commit hooks run against the new snapshot and may return a replacement
//!    snapshot (this is how derived state is kept in sync).
//! 2. Subscribers whose selected value changed are notified.
//! 3. If listeners wrote to the store, steps 1-2 repeat until the state
//!    settles.
//! 4. [`Store::render_requested`] is emitted once.
//!
//! No partially-updated snapshot is ever observable: every read returns a
//! complete `Arc<S>` that was committed as a whole.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use slotmap::{new_key_type, SlotMap};

use crate::error::StoreError;
use crate::logging::targets;
use crate::signal::Signal;

/// Maximum number of hook/notify rounds in one flush.
const MAX_FLUSH_ROUNDS: usize = 32;

new_key_type! {
    /// Identifies one selector subscription on a [`Store`].
    pub struct SubscriptionId;
}

/// A function run at every flush that may derive a new snapshot.
///
/// Returning `None` leaves the state untouched.
pub type CommitHook<S> = Arc<dyn Fn(&Arc<S>) -> Option<S> + Send + Sync>;

trait Watcher<S>: Send {
    fn check(&mut self, state: &S);
}

/// Deep-equality watcher: fires when the selected value is `!=` the last one.
struct ValueWatcher<S, T> {
    selector: Box<dyn Fn(&S) -> T + Send>,
    listener: Box<dyn Fn(&T) + Send>,
    last: T,
}

impl<S, T: PartialEq + Send> Watcher<S> for ValueWatcher<S, T> {
    fn check(&mut self, state: &S) {
        let next = (self.selector)(state);
        if next != self.last {
            self.last = next;
            (self.listener)(&self.last);
        }
    }
}

/// Reference watcher: fires when the selected `Arc` points somewhere else.
struct RefWatcher<S, T> {
    selector: Box<dyn Fn(&S) -> Arc<T> + Send>,
    listener: Box<dyn Fn(&Arc<T>) + Send>,
    last: Arc<T>,
}

impl<S, T: Send + Sync> Watcher<S> for RefWatcher<S, T> {
    fn check(&mut self, state: &S) {
        let next = (self.selector)(state);
        if !Arc::ptr_eq(&next, &self.last) {
            self.last = next;
            (self.listener)(&self.last);
        }
    }
}

type SharedWatcher<S> = Arc<Mutex<dyn Watcher<S>>>;

/// A reactive container for an immutable state snapshot.
pub struct Store<S> {
    state: RwLock<Arc<S>>,
    /// Serializes writers so read-compute-write is atomic.
    writer: Mutex<()>,
    version: AtomicU64,
    batch_depth: AtomicUsize,
    dirty: AtomicBool,
    flushing: AtomicBool,
    hooks: RwLock<Vec<CommitHook<S>>>,
    watchers: Mutex<SlotMap<SubscriptionId, SharedWatcher<S>>>,
    render_requested: Signal<u64>,
}

impl<S: Send + Sync + 'static> Store<S> {
    /// Create a store holding `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            state: RwLock::new(Arc::new(initial)),
            writer: Mutex::new(()),
            version: AtomicU64::new(0),
            batch_depth: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            hooks: RwLock::new(Vec::new()),
            watchers: Mutex::new(SlotMap::with_key()),
            render_requested: Signal::new(),
        }
    }

    /// The current snapshot.
    pub fn get_state(&self) -> Arc<S> {
        self.state.read().clone()
    }

    /// Monotonic counter bumped on every committed write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Signal emitted once per settled batch with the resulting version.
    ///
    /// Hosts connect their re-render scheduling here.
    pub fn render_requested(&self) -> &Signal<u64> {
        &self.render_requested
    }

    /// Apply a functional update.
    ///
    /// The updater must be pure: it must not read or write this store.
    /// Outside of a batch the change is flushed immediately.
    pub fn set_state<F>(&self, updater: F)
    where
        F: FnOnce(&S) -> S,
    {
        {
            let _writer = self.writer.lock();
            let prev = self.get_state();
            let next = updater(&prev);
            self.commit(next);
        }
        self.flush_if_idle();
    }

    /// Run `f` as one batch: notifications are deferred until it returns.
    ///
    /// Batches nest; only the outermost one flushes.
    pub fn batch<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        struct DepthGuard<'a>(&'a AtomicUsize);
        impl Drop for DepthGuard<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::AcqRel);
            }
        }

        let result = {
            self.batch_depth.fetch_add(1, Ordering::AcqRel);
            let _guard = DepthGuard(&self.batch_depth);
            f()
        };
        self.flush_if_idle();
        result
    }

    /// Register a hook that runs at every flush before listeners fire.
    ///
    /// Hooks run in registration order, each seeing the output of the
    /// previous one.
    pub fn add_commit_hook(&self, hook: CommitHook<S>) {
        self.hooks.write().push(hook);
        self.dirty.store(true, Ordering::Release);
        self.flush_if_idle();
    }

    /// Subscribe to a selected value compared by deep equality.
    ///
    /// The listener is not called for the value current at subscription time.
    pub fn subscribe<T, F, L>(&self, selector: F, listener: L) -> SubscriptionId
    where
        T: PartialEq + Send + 'static,
        F: Fn(&S) -> T + Send + 'static,
        L: Fn(&T) + Send + 'static,
    {
        let last = selector(&self.get_state());
        let watcher: SharedWatcher<S> = Arc::new(Mutex::new(ValueWatcher {
            selector: Box::new(selector),
            listener: Box::new(listener),
            last,
        }));
        self.watchers.lock().insert(watcher)
    }

    /// Subscribe to a selected `Arc` compared by reference.
    pub fn subscribe_ref<T, F, L>(&self, selector: F, listener: L) -> SubscriptionId
    where
        T: Send + Sync + 'static,
        F: Fn(&S) -> Arc<T> + Send + 'static,
        L: Fn(&Arc<T>) + Send + 'static,
    {
        let last = selector(&self.get_state());
        let watcher: SharedWatcher<S> = Arc::new(Mutex::new(RefWatcher {
            selector: Box::new(selector),
            listener: Box::new(listener),
            last,
        }));
        self.watchers.lock().insert(watcher)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.watchers
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::UnknownSubscription)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.watchers.lock().len()
    }

    fn commit(&self, next: S) {
        *self.state.write() = Arc::new(next);
        self.version.fetch_add(1, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
    }

    fn flush_if_idle(&self) {
        if self.batch_depth.load(Ordering::Acquire) == 0
            && !self.flushing.load(Ordering::Acquire)
            && self.dirty.load(Ordering::Acquire)
        {
            if let Err(err) = self.flush() {
                tracing::warn!(target: targets::STORE, error = %err, "flush did not settle");
            }
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut rounds = 0;
        let mut outcome = Ok(());
        while self.dirty.load(Ordering::Acquire) {
            rounds += 1;
            if rounds > MAX_FLUSH_ROUNDS {
                self.dirty.store(false, Ordering::Release);
                outcome = Err(StoreError::NotificationLoop {
                    rounds: MAX_FLUSH_ROUNDS,
                });
                break;
            }

            let hooks: Vec<CommitHook<S>> = self.hooks.read().clone();
            for hook in hooks {
                let _writer = self.writer.lock();
                let current = self.get_state();
                if let Some(next) = hook(&current) {
                    self.commit(next);
                }
            }
            self.dirty.store(false, Ordering::Release);

            let state = self.get_state();
            let watchers: Vec<SharedWatcher<S>> = self.watchers.lock().values().cloned().collect();
            tracing::trace!(
                target: targets::STORE,
                round = rounds,
                watchers = watchers.len(),
                "notifying subscribers"
            );
            for watcher in watchers {
                watcher.lock().check(&state);
            }
        }

        self.flushing.store(false, Ordering::Release);
        self.render_requested.emit(self.version());
        outcome
    }
}

static_assertions::assert_impl_all!(Store<Vec<u8>>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Counter {
        value: i32,
        label: Arc<String>,
    }

    #[test]
    fn test_set_state_notifies_on_change() {
        let store = Store::new(Counter::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        store.subscribe(|s: &Counter| s.value, move |v| seen_clone.lock().push(*v));

        store.set_state(|prev| Counter {
            value: prev.value + 1,
            ..prev.clone()
        });
        // Unchanged selected value: no notification.
        store.set_state(|prev| prev.clone());

        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_batch_merges_updates() {
        let store = Store::new(Counter::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let renders = Arc::new(Mutex::new(0));

        let seen_clone = seen.clone();
        store.subscribe(|s: &Counter| s.value, move |v| seen_clone.lock().push(*v));
        let renders_clone = renders.clone();
        store.render_requested().connect(move |_| *renders_clone.lock() += 1);

        store.batch(|| {
            for _ in 0..3 {
                store.set_state(|prev| Counter {
                    value: prev.value + 1,
                    ..prev.clone()
                });
            }
        });

        assert_eq!(store.get_state().value, 3);
        assert_eq!(*seen.lock(), vec![3]);
        assert_eq!(*renders.lock(), 1);
    }

    #[test]
    fn test_reference_subscription() {
        let store = Store::new(Counter::default());
        let count = Arc::new(Mutex::new(0));

        let count_clone = count.clone();
        store.subscribe_ref(
            |s: &Counter| s.label.clone(),
            move |_| *count_clone.lock() += 1,
        );

        // Same Arc: no notification.
        store.set_state(|prev| Counter {
            value: 5,
            ..prev.clone()
        });
        assert_eq!(*count.lock(), 0);

        // Equal content in a new Arc: reference changed.
        store.set_state(|prev| Counter {
            label: Arc::new(String::new()),
            ..prev.clone()
        });
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_commit_hook_derives_state() {
        #[derive(Clone, Default)]
        struct Doubled {
            input: i32,
            output: i32,
        }

        let store = Store::new(Doubled::default());
        store.add_commit_hook(Arc::new(|s: &Arc<Doubled>| {
            (s.output != s.input * 2).then(|| Doubled {
                input: s.input,
                output: s.input * 2,
            })
        }));

        store.set_state(|prev| Doubled {
            input: 21,
            ..prev.clone()
        });
        assert_eq!(store.get_state().output, 42);
    }

    #[test]
    fn test_listener_can_write_back() {
        let store = Arc::new(Store::new(Counter::default()));
        let inner = store.clone();
        store.subscribe(
            |s: &Counter| s.value,
            move |v| {
                if *v < 3 {
                    let next = *v + 1;
                    inner.set_state(move |prev| Counter {
                        value: next,
                        ..prev.clone()
                    });
                }
            },
        );

        store.set_state(|prev| Counter {
            value: 1,
            ..prev.clone()
        });
        assert_eq!(store.get_state().value, 3);
    }

    #[test]
    fn test_unsubscribe() {
        let store = Store::new(Counter::default());
        let id = store.subscribe(|s: &Counter| s.value, |_| {});
        assert_eq!(store.subscription_count(), 1);
        assert!(store.unsubscribe(id).is_ok());
        assert_eq!(store.unsubscribe(id), Err(StoreError::UnknownSubscription));
    }
}
