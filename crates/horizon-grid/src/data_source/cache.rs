//! Response caches.
//!
//! The manager never builds cache keys itself: it asks the adapter through
//! [`DataSourceCache::get_key`], so a cache decides what makes two requests
//! equivalent.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::{GetRowsParams, GetRowsResponse};
use crate::filter::FilterModel;
use crate::logging::targets;
use crate::pagination::PaginationModel;
use crate::sort::SortModel;

/// A pluggable response cache.
pub trait DataSourceCache: Send + Sync {
    /// Key identifying `params`.
    fn get_key(&self, params: &GetRowsParams) -> String;

    /// Cached response for `key`, if present and valid.
    fn get(&self, key: &str) -> Option<GetRowsResponse>;

    /// Store a response.
    fn set(&self, key: String, response: GetRowsResponse);

    /// Drop every entry.
    fn clear(&self);
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheKey<'a> {
    filter_model: &'a FilterModel,
    sort_model: &'a SortModel,
    pagination_model: &'a PaginationModel,
    start: usize,
    end: usize,
    group_keys: &'a [String],
}

/// JSON of the models, range and group path of `params`.
pub fn default_cache_key(params: &GetRowsParams) -> String {
    let key = CacheKey {
        filter_model: &params.filter_model,
        sort_model: &params.sort_model,
        pagination_model: &params.pagination_model,
        start: params.start,
        end: params.end,
        group_keys: &params.group_keys,
    };
    serde_json::to_string(&key).unwrap_or_else(|_| format!("{params:?}"))
}

/// In-memory cache whose entries expire after a fixed time.
pub struct DefaultDataSourceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, GetRowsResponse)>>,
}

impl DefaultDataSourceCache {
    /// Default time to live.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    /// Create a cache with the given time to live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DefaultDataSourceCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl fmt::Debug for DefaultDataSourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultDataSourceCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

impl DataSourceCache for DefaultDataSourceCache {
    fn get_key(&self, params: &GetRowsParams) -> String {
        default_cache_key(params)
    }

    fn get(&self, key: &str) -> Option<GetRowsResponse> {
        let mut entries = self.entries.lock();
        let (stored, response) = entries.get(key)?;
        if stored.elapsed() < self.ttl {
            return Some(response.clone());
        }
        tracing::trace!(target: targets::DATA_SOURCE, key, "cache entry expired");
        entries.remove(key);
        None
    }

    fn set(&self, key: String, response: GetRowsResponse) {
        self.entries.lock().insert(key, (Instant::now(), response));
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDataSourceCache;

impl DataSourceCache for NoopDataSourceCache {
    fn get_key(&self, params: &GetRowsParams) -> String {
        default_cache_key(params)
    }

    fn get(&self, _key: &str) -> Option<GetRowsResponse> {
        None
    }

    fn set(&self, _key: String, _response: GetRowsResponse) {}

    fn clear(&self) {}
}
