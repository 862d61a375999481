//! Server-side row loading.
//!
//! A [`DataSource`] answers [`GetRowsParams`] asynchronously. The
//! [`DataSourceManager`] sits between it and a [`GridApi`]: it serves
//! repeated requests from a [`DataSourceCache`], skips requests already in
//! flight, and discards responses whose request no longer matches the grid's
//! models.

mod cache;
mod lazy;

pub use cache::{DataSourceCache, DefaultDataSourceCache, NoopDataSourceCache, default_cache_key};
pub use lazy::LazyLoader;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::GridApi;
use crate::error::{DataSourceError, Result};
use crate::filter::FilterModel;
use crate::logging::targets;
use crate::pagination::PaginationModel;
use crate::sort::SortModel;

/// Parameters of one `get_rows` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetRowsParams {
    /// Sort model.
    pub sort_model: SortModel,
    /// Filter model.
    pub filter_model: FilterModel,
    /// Pagination model.
    pub pagination_model: PaginationModel,
    /// First requested index.
    pub start: usize,
    /// Last requested index, inclusive.
    pub end: usize,
    /// Cursor returned by the previous response, for cursor paging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Grouping fields.
    pub group_fields: Vec<String>,
    /// Group path whose children are requested; empty for top-level rows.
    pub group_keys: Vec<String>,
}

/// Cursor paging details of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    /// Whether more rows follow.
    pub has_next_page: Option<bool>,
    /// Cursor for the next request.
    pub next_cursor: Option<String>,
}

/// A `get_rows` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetRowsResponse {
    /// Row records.
    pub rows: Vec<Value>,
    /// Total rows on the server, when known.
    pub row_count: Option<usize>,
    /// Cursor paging details.
    pub page_info: Option<PageInfo>,
}

impl GetRowsResponse {
    /// A response with rows only.
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Set the total row count.
    pub fn with_row_count(mut self, count: usize) -> Self {
        self.row_count = Some(count);
        self
    }

    /// Set cursor paging details.
    pub fn with_page_info(mut self, page_info: PageInfo) -> Self {
        self.page_info = Some(page_info);
        self
    }
}

/// A remote row provider.
pub trait DataSource: Send + Sync {
    /// Fetch rows for `params`.
    fn get_rows(&self, params: GetRowsParams) -> BoxFuture<'static, std::result::Result<GetRowsResponse, DataSourceError>>;

    /// Persist an edited row and return the stored version.
    fn update_row(&self, _row: Value) -> BoxFuture<'static, std::result::Result<Value, DataSourceError>> {
        async { Err(DataSourceError::NotSupported) }.boxed()
    }
}

/// What happened to a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The response was applied to the grid.
    Applied,
    /// A cached response was applied.
    FromCache,
    /// An identical request was already in flight.
    Skipped,
    /// The grid's models changed while the request was pending; the response
    /// was cached but not applied.
    Stale,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestSignature<'a> {
    filter_model: &'a FilterModel,
    sort_model: &'a SortModel,
    pagination_model: &'a PaginationModel,
    group_keys: &'a [String],
}

/// The models a response must still match to be applied.
fn request_signature(params: &GetRowsParams) -> String {
    let signature = RequestSignature {
        filter_model: &params.filter_model,
        sort_model: &params.sort_model,
        pagination_model: &params.pagination_model,
        group_keys: &params.group_keys,
    };
    serde_json::to_string(&signature).unwrap_or_default()
}

/// Removes its key from the in-flight set when dropped, so a cancelled fetch
/// does not block later ones.
///
/// A request that ends without reaching the grid (stale or cancelled) clears
/// the loading flag once nothing else is in flight.
struct InFlight<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: String,
    api: &'a GridApi,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let idle = {
            let mut keys = self.keys.lock();
            keys.remove(&self.key);
            keys.is_empty()
        };
        if !self.settled && idle {
            self.api.clear_data_source_loading();
        }
    }
}

/// Drives a [`DataSource`] on behalf of a grid.
pub struct DataSourceManager {
    api: GridApi,
    source: Arc<dyn DataSource>,
    cache: Arc<dyn DataSourceCache>,
    in_flight: Mutex<HashSet<String>>,
    lazy: Mutex<LazyLoader>,
}

impl DataSourceManager {
    /// Create a manager with a [`DefaultDataSourceCache`] using the grid's
    /// `cache_ttl_ms`.
    pub fn new(api: GridApi, source: Arc<dyn DataSource>) -> Self {
        let ttl = std::time::Duration::from_millis(api.state().config.cache_ttl_ms);
        Self::with_cache(api, source, Arc::new(DefaultDataSourceCache::new(ttl)))
    }

    /// Create a manager with a custom cache.
    pub fn with_cache(api: GridApi, source: Arc<dyn DataSource>, cache: Arc<dyn DataSourceCache>) -> Self {
        let lazy = LazyLoader::new(api.state().config.lazy_loading.clone());
        Self {
            api,
            source,
            cache,
            in_flight: Mutex::new(HashSet::new()),
            lazy: Mutex::new(lazy),
        }
    }

    /// The grid this manager feeds.
    pub fn api(&self) -> &GridApi {
        &self.api
    }

    /// Number of requests in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Parameters for the rows the grid currently shows: the current page
    /// with server pagination, the first block with lazy loading, otherwise
    /// everything.
    pub fn view_params(&self) -> GetRowsParams {
        let state = self.api.state();
        let config = &state.config;
        let (start, end) = if config.pagination {
            let model = *state.pagination_model;
            let start = model.page * model.page_size;
            (start, start + model.page_size.max(1) - 1)
        } else if config.lazy_loading.enabled {
            (0, config.lazy_loading.block_size.max(1) - 1)
        } else {
            (0, usize::MAX)
        };
        self.api.get_rows_params(start, end)
    }

    /// Fetch the rows the grid currently shows.
    pub async fn refresh(&self) -> Result<FetchOutcome> {
        self.lazy.lock().reset();
        self.fetch_rows(self.view_params()).await
    }

    /// Fetch rows and apply them to the grid.
    ///
    /// Fetch failures are recorded in the grid's row state (loaded rows are
    /// kept) and returned as [`GridError::DataSource`](crate::GridError).
    pub async fn fetch_rows(&self, params: GetRowsParams) -> Result<FetchOutcome> {
        let key = self.cache.get_key(&params);
        if let Some(response) = self.cache.get(&key) {
            tracing::debug!(target: targets::DATA_SOURCE, start = params.start, end = params.end, "serving rows from cache");
            self.api.apply_data_source_response(&params, response)?;
            return Ok(FetchOutcome::FromCache);
        }

        if !self.in_flight.lock().insert(key.clone()) {
            tracing::debug!(target: targets::DATA_SOURCE, start = params.start, end = params.end, "request already in flight");
            return Ok(FetchOutcome::Skipped);
        }
        let mut guard = InFlight {
            keys: &self.in_flight,
            key,
            api: &self.api,
            settled: false,
        };

        let signature = request_signature(&params);
        self.api.set_data_source_loading(&params);
        tracing::debug!(
            target: targets::DATA_SOURCE,
            start = params.start,
            end = params.end,
            group_keys = ?params.group_keys,
            "fetching rows"
        );
        let result = self.source.get_rows(params.clone()).await;

        let stale = self.current_signature(&params) != signature;
        match result {
            Ok(response) => {
                self.cache.set(guard.key.clone(), response.clone());
                if stale {
                    tracing::debug!(target: targets::DATA_SOURCE, start = params.start, end = params.end, "discarding stale response");
                    return Ok(FetchOutcome::Stale);
                }
                guard.settled = true;
                drop(guard);
                self.api.apply_data_source_response(&params, response)?;
                Ok(FetchOutcome::Applied)
            }
            Err(err) if stale => {
                tracing::debug!(target: targets::DATA_SOURCE, error = %err, "discarding stale failure");
                Ok(FetchOutcome::Stale)
            }
            Err(err) => {
                tracing::error!(target: targets::DATA_SOURCE, start = params.start, end = params.end, error = %err, "fetch failed");
                guard.settled = true;
                drop(guard);
                self.api.apply_data_source_error(&params, err.clone());
                Err(err.into())
            }
        }
    }

    /// Fetch the children of the group at `group_keys`.
    pub async fn fetch_children(&self, group_keys: Vec<String>) -> Result<FetchOutcome> {
        let params = GetRowsParams {
            group_keys,
            ..self.api.get_rows_params(0, usize::MAX)
        };
        self.fetch_rows(params).await
    }

    /// Fetch whatever the lazy loader asks for at time `now`.
    ///
    /// Returns `None` when no request is due.
    pub async fn load_more(&self, now: Instant) -> Option<Result<FetchOutcome>> {
        let range = self.lazy.lock().next_request(&self.api.state(), now)?;
        let outcome = self.fetch_rows(self.api.get_rows_params(range.first, range.last)).await;
        self.lazy.lock().complete(range);
        Some(outcome)
    }

    /// Persist an edited row, then merge the stored version into the grid.
    ///
    /// The cache is cleared since any cached response may hold the old row.
    pub async fn update_row(&self, row: Value) -> Result<Value> {
        match self.source.update_row(row).await {
            Ok(updated) => {
                self.cache.clear();
                self.api.patch_row(updated.clone())?;
                Ok(updated)
            }
            Err(err) => {
                tracing::error!(target: targets::DATA_SOURCE, error = %err, "row update failed");
                Err(err.into())
            }
        }
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        tracing::debug!(target: targets::DATA_SOURCE, "clearing data source cache");
        self.cache.clear();
    }

    /// Fetch on the current tokio runtime.
    #[cfg(feature = "tokio")]
    pub fn spawn_fetch(self: &Arc<Self>, params: GetRowsParams) -> tokio::task::JoinHandle<Result<FetchOutcome>> {
        let manager = self.clone();
        tokio::spawn(async move { manager.fetch_rows(params).await })
    }

    fn current_signature(&self, params: &GetRowsParams) -> String {
        let current = GetRowsParams {
            group_keys: params.group_keys.clone(),
            ..self.api.get_rows_params(params.start, params.end)
        };
        request_signature(&current)
    }
}

impl fmt::Debug for DataSourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceManager")
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(DataSourceManager: Send, Sync);
