//! Dependency-tracked memoized values.
//!
//! A [`Memo<T>`] caches one derived value together with the list of inputs it
//! was computed from. Inputs are identified by reference through [`DepKey`]:
//! two keys are equal only when they point at the same allocation, so the
//! freshness check is O(number of dependencies) regardless of how large the
//! inputs are.
//!
//! The memo keeps clones of its dependency handles alive, which means an
//! address can never be recycled by a different value while the cache still
//! refers to it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_grid_core::{DepKey, Memo};
//!
//! let rows = Arc::new(vec![3, 1, 2]);
//! let sorted: Memo<Vec<i32>> = Memo::new("sorted_rows");
//!
//! let first = sorted.get_or_compute(vec![DepKey::of(&rows)], || {
//!     let mut out = (*rows).clone();
//!     out.sort();
//!     out
//! });
//! assert_eq!(first, vec![1, 2, 3]);
//!
//! // Same input reference: served from cache.
//! sorted.get_or_compute(vec![DepKey::of(&rows)], || unreachable!());
//! assert_eq!(sorted.hits(), 1);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::logging::targets;

/// A reference-identity handle to one input of a derived value.
#[derive(Clone)]
pub struct DepKey(Arc<dyn Any + Send + Sync>);

impl DepKey {
    /// Create a key identifying the allocation behind `value`.
    pub fn of<T: Any + Send + Sync>(value: &Arc<T>) -> Self {
        let erased: Arc<dyn Any + Send + Sync> = value.clone();
        Self(erased)
    }

    /// Returns `true` if both keys refer to the same allocation.
    pub fn same(&self, other: &DepKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepKey({:p})", Arc::as_ptr(&self.0))
    }
}

fn same_deps(a: &[DepKey], b: &[DepKey]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
}

struct Cached<T> {
    deps: Vec<DepKey>,
    value: T,
}

/// A cached value recomputed only when its declared dependencies change.
pub struct Memo<T> {
    name: &'static str,
    cached: RwLock<Option<Cached<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> Memo<T> {
    /// Create an empty memo. The name is used in trace output.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cached: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached value if `deps` match, otherwise compute and cache.
    pub fn get_or_compute<F>(&self, deps: Vec<DepKey>, compute: F) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some(cached) = self.cached.read().as_ref() {
            if same_deps(&cached.deps, &deps) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return cached.value.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: targets::MEMO, memo = self.name, "recomputing");
        let value = compute();
        *self.cached.write() = Some(Cached {
            deps,
            value: value.clone(),
        });
        value
    }

    /// Returns `true` if a cached value exists for exactly these dependencies.
    pub fn is_fresh(&self, deps: &[DepKey]) -> bool {
        self.cached
            .read()
            .as_ref()
            .is_some_and(|cached| same_deps(&cached.deps, deps))
    }

    /// The cached value regardless of freshness.
    pub fn peek(&self) -> Option<T> {
        self.cached.read().as_ref().map(|c| c.value.clone())
    }

    /// Drop the cached value, forcing recomputation on next access.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    /// Number of lookups served from cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of recomputations.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("name", &self.name)
            .field("cached", &self.peek())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
