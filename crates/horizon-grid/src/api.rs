//! The grid façade.
//!
//! [`GridApi`] is the only way to read or change grid state. It owns the
//! [`Store`], installs the commit hook that keeps derived state in sync, and
//! publishes [`GridEvent`]s after every settled batch.
//!
//! ```
//! use horizon_grid::{ColumnDef, ColumnType, GridApi, GridConfig, SortItem, SortModel};
//! use serde_json::json;
//!
//! let api = GridApi::new(
//!     vec![ColumnDef::new("age", ColumnType::Number)],
//!     GridConfig::default(),
//! );
//! api.set_rows(vec![
//!     json!({"id": 1, "age": 30}),
//!     json!({"id": 2, "age": 25}),
//! ])
//! .unwrap();
//! api.set_sort_model(SortModel::new(vec![SortItem::asc("age")]));
//! assert_eq!(api.visible_rows()[0], horizon_grid::RowId::from(2));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use horizon_grid_core::{ConnectionGuard, ConnectionId, Signal, Store, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::column::{ColumnDef, ColumnLayout, ColumnVisibilityModel, ColumnsState, PinnedColumns};
use crate::config::{GridConfig, ProcessingMode};
use crate::data_source::{GetRowsParams, GetRowsResponse};
use crate::error::{DataSourceError, GridError, Result, StructuralError};
use crate::event::GridEvent;
use crate::filter::FilterModel;
use crate::grouping::aggregation::{AggregationFunction, AggregationModel};
use crate::grouping::{GroupingModel, TreeDataSource};
use crate::logging::targets;
use crate::pagination::{PaginationMeta, PaginationModel, page_count};
use crate::pipeline::{PipelineRegistry, PipelineRun, PipelineStage, ProcessedRows, RowProcessor};
use crate::rows::{GridRowModel, RowIdGetter, RowUpdate, RowsState, default_row_id_getter};
use crate::sort::SortModel;
use crate::state::{GridState, InitialState, TreeDataConfig};
use crate::tree::{RowNode, RowNodeKind};
use crate::value::{CellValue, RowId};
use crate::virtualization::{RenderContext, RowSizes, ViewportState, VirtualScroller, WindowRequest, visible_range};

/// Height of one row in pixels, or `None` for the configured height.
type RowHeightGetter = Arc<dyn Fn(&Value) -> Option<f64> + Send + Sync>;

/// Derives pipeline output, layout and render window at every commit.
struct Engine {
    pipeline: PipelineRegistry,
    row_height: RwLock<Option<RowHeightGetter>>,
    scroller: Mutex<VirtualScroller>,
    pending: Mutex<Vec<GridEvent>>,
    structural_errors: Mutex<Vec<StructuralError>>,
    at_scroll_end: AtomicBool,
}

impl Engine {
    fn new(config: &GridConfig) -> Self {
        Self {
            pipeline: PipelineRegistry::with_defaults(),
            row_height: RwLock::new(None),
            scroller: Mutex::new(VirtualScroller::new(config.scroll_threshold_px)),
            pending: Mutex::new(Vec::new()),
            structural_errors: Mutex::new(Vec::new()),
            at_scroll_end: AtomicBool::new(false),
        }
    }

    fn queue(&self, event: GridEvent) {
        self.pending.lock().push(event);
    }

    fn take_events(&self) -> Vec<GridEvent> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Heights of the rows on the current page. Group and footer rows use
    /// the configured height.
    fn row_sizes(&self, state: &GridState) -> RowSizes {
        let ids = state.processed.page_rows();
        let default = state.config.effective_row_height();
        match &*self.row_height.read() {
            None => RowSizes::uniform(default, ids.len()),
            Some(getter) => {
                let heights: Vec<f64> = ids
                    .iter()
                    .map(|id| state.rows.get(id).and_then(|row| getter(row)).unwrap_or(default))
                    .collect();
                RowSizes::variable(&heights)
            }
        }
    }

    fn take_structural_errors(&self) -> Vec<StructuralError> {
        std::mem::take(&mut *self.structural_errors.lock())
    }

    fn report(&self, run: &PipelineRun) {
        for report in &run.reports {
            for warning in &report.warnings {
                self.queue(GridEvent::Warning(warning.clone()));
            }
            for error in &report.errors {
                tracing::error!(target: targets::API, stage = %report.stage, error = ?error, "rows left out of the row tree");
                self.structural_errors.lock().push(error.clone());
                self.queue(GridEvent::TreeDataError(error.clone()));
            }
            if report.stage == PipelineStage::Group {
                self.queue(GridEvent::RowTreeRebuilt {
                    kind: run.output.tree.kind(),
                    node_count: run.output.tree.len(),
                });
            }
        }
    }

    /// The commit hook. Returns `None` when every derived slice is current.
    fn derive(&self, state: &Arc<GridState>) -> Option<GridState> {
        let mut next = GridState::clone(state);
        let mut changed = false;

        // A clamped page changes the paginate stage input, so run at most twice.
        for _ in 0..2 {
            let run = self.pipeline.run(&next);
            self.report(&run);
            if !Arc::ptr_eq(&run.output, &next.processed) {
                next.processed = run.output;
                changed = true;
            }

            let (meta, known) = pagination_meta(&next);
            if meta != next.pagination_meta {
                next.pagination_meta = meta;
                changed = true;
            }
            if !next.config.pagination || !known {
                break;
            }
            let clamped = next.pagination_model.clamped(meta.row_count);
            if clamped == *next.pagination_model {
                break;
            }
            tracing::debug!(
                target: targets::PAGINATION,
                page = next.pagination_model.page,
                clamped = clamped.page,
                "pagination model out of range"
            );
            next.pagination_model = Arc::new(clamped);
            self.queue(GridEvent::PaginationModelChanged(clamped));
            changed = true;
        }

        let layout = ColumnLayout::compute(&next.columns.visible(), next.viewport.width);
        if layout != *next.column_layout {
            next.column_layout = Arc::new(layout);
            changed = true;
        }

        let page_len = next.processed.page_rows().len();
        let sizes = self.row_sizes(&next);
        let context = {
            let mut scroller = self.scroller.lock();
            scroller.set_threshold(next.config.scroll_threshold_px);
            scroller.update(&WindowRequest {
                rows: &sizes,
                columns: &next.column_layout,
                viewport: &next.viewport,
                row_buffer: next.config.row_buffer,
                column_buffer: next.config.column_buffer,
            })
        };
        if context != next.render_context {
            next.render_context = context;
            changed = true;
            self.queue(GridEvent::RenderedRowsIntervalChange(context));
        }

        let viewport = &next.viewport;
        let at_end = viewport.height > 0.0
            && visible_range(&sizes, viewport.scroll_top, viewport.height).is_some_and(|r| r.last + 1 == page_len);
        if at_end {
            if !self.at_scroll_end.swap(true, Ordering::AcqRel) {
                self.queue(GridEvent::RowsScrollEnd {
                    visible_row_count: page_len,
                });
            }
        } else {
            self.at_scroll_end.store(false, Ordering::Release);
        }

        changed.then_some(next)
    }
}

/// Row and page counts, plus whether the row count is known.
fn pagination_meta(state: &GridState) -> (PaginationMeta, bool) {
    let (row_count, known) = match state.config.pagination_mode {
        ProcessingMode::Client => (state.processed.top_level_count(), true),
        ProcessingMode::Server => match state.rows.total_row_count {
            Some(count) => (count, true),
            None => (state.rows.len(), false),
        },
    };
    let meta = PaginationMeta {
        row_count,
        page_count: page_count(row_count, state.pagination_model.page_size),
    };
    (meta, known)
}

struct GridApiInner {
    store: Store<GridState>,
    engine: Arc<Engine>,
    events: Arc<Signal<GridEvent>>,
    row_id_getter: RwLock<RowIdGetter>,
}

/// Handle to a grid. Cloning is cheap and every clone drives the same grid.
#[derive(Clone)]
pub struct GridApi {
    inner: Arc<GridApiInner>,
}

impl GridApi {
    /// Create a grid with no rows.
    pub fn new(columns: Vec<ColumnDef>, config: GridConfig) -> Self {
        Self::with_initial_state(columns, config, &InitialState::default())
    }

    /// Create a grid restored from `initial`.
    pub fn with_initial_state(columns: Vec<ColumnDef>, config: GridConfig, initial: &InitialState) -> Self {
        let engine = Arc::new(Engine::new(&config));
        let events: Arc<Signal<GridEvent>> = Arc::new(Signal::new());
        let state = GridState::new(ColumnsState::new(columns), config).with_initial_state(initial);
        let store = Store::new(state);

        {
            let engine = engine.clone();
            let events = events.clone();
            store.render_requested().connect(move |version| {
                let published = events.emit_each(engine.take_events());
                if published > 0 {
                    tracing::trace!(target: targets::API, version, published, "published events");
                }
            });
        }
        {
            let engine = engine.clone();
            store.add_commit_hook(Arc::new(move |state| engine.derive(state)));
        }

        tracing::debug!(target: targets::API, "grid created");
        Self {
            inner: Arc::new(GridApiInner {
                store,
                engine,
                events,
                row_id_getter: RwLock::new(default_row_id_getter()),
            }),
        }
    }

    // =========================================================================
    // State and events
    // =========================================================================

    /// The current snapshot.
    pub fn state(&self) -> Arc<GridState> {
        self.inner.store.get_state()
    }

    /// Subscribe to a selected value, notified when it changes by equality.
    pub fn subscribe<T, F, L>(&self, selector: F, listener: L) -> SubscriptionId
    where
        T: PartialEq + Send + 'static,
        F: Fn(&GridState) -> T + Send + 'static,
        L: Fn(&T) + Send + 'static,
    {
        self.inner.store.subscribe(selector, listener)
    }

    /// Subscribe to a selected `Arc`, notified when it changes by reference.
    pub fn subscribe_ref<T, F, L>(&self, selector: F, listener: L) -> SubscriptionId
    where
        T: Send + Sync + 'static,
        F: Fn(&GridState) -> Arc<T> + Send + 'static,
        L: Fn(&Arc<T>) + Send + 'static,
    {
        self.inner.store.subscribe_ref(selector, listener)
    }

    /// Remove a state subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.store.unsubscribe(id).is_ok()
    }

    /// Receive every published event.
    pub fn subscribe_events<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn(&GridEvent) + Send + Sync + 'static,
    {
        self.inner.events.connect(listener)
    }

    /// Receive events until the returned guard is dropped.
    pub fn subscribe_events_scoped<F>(&self, listener: F) -> ConnectionGuard<GridEvent>
    where
        F: Fn(&GridEvent) + Send + Sync + 'static,
    {
        self.inner.events.connect_scoped(listener)
    }

    /// Stop receiving events. Returns `false` for unknown ids.
    pub fn unsubscribe_events(&self, id: ConnectionId) -> bool {
        self.inner.events.disconnect(id)
    }

    /// Run several updates as one batch: derived state is recomputed and
    /// events are published once, after `f` returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.store.batch(f)
    }

    /// Monotonic state version.
    pub fn version(&self) -> u64 {
        self.inner.store.version()
    }

    fn update(&self, event: Option<GridEvent>, updater: impl FnOnce(&GridState) -> GridState) {
        self.inner.store.set_state(|state| {
            if let Some(event) = event {
                self.inner.engine.queue(event);
            }
            updater(state)
        });
    }

    /// Apply a fallible update atomically. Structural errors found while
    /// rebuilding the tree are returned after the state is committed.
    fn try_update(&self, updater: impl FnOnce(&GridState) -> Result<GridState>) -> Result<()> {
        self.inner.engine.structural_errors.lock().clear();
        let mut outcome = Ok(());
        self.inner.store.set_state(|state| match updater(state) {
            Ok(next) => next,
            Err(err) => {
                outcome = Err(err);
                state.clone()
            }
        });
        outcome?;
        match self.inner.engine.take_structural_errors().into_iter().next() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Rows and columns
    // =========================================================================

    /// Use a custom row id getter for subsequently ingested rows.
    pub fn set_row_id_getter<F>(&self, getter: F)
    where
        F: Fn(&Value) -> Option<RowId> + Send + Sync + 'static,
    {
        *self.inner.row_id_getter.write() = Arc::new(getter);
    }

    /// Give rows individual heights. Rows the getter returns `None` for, and
    /// group rows, keep the configured height.
    pub fn set_row_height_getter<F>(&self, getter: F)
    where
        F: Fn(&Value) -> Option<f64> + Send + Sync + 'static,
    {
        *self.inner.engine.row_height.write() = Some(Arc::new(getter));
        self.update(None, GridState::clone);
    }

    /// Go back to the configured uniform row height.
    pub fn clear_row_height_getter(&self) {
        if self.inner.engine.row_height.write().take().is_some() {
            self.update(None, GridState::clone);
        }
    }

    fn row_id_getter(&self) -> RowIdGetter {
        self.inner.row_id_getter.read().clone()
    }

    /// Replace all rows.
    ///
    /// Fails without changing state on missing or duplicate ids. A cycle in
    /// tree data is reported after the rows are committed; the cyclic rows
    /// are left out of the tree.
    pub fn set_rows(&self, rows: Vec<Value>) -> Result<()> {
        let rows = RowsState::from_rows(rows, &self.row_id_getter())?;
        let engine = &self.inner.engine;
        self.try_update(|state| {
            engine.queue(GridEvent::RowsSet { row_count: rows.len() });
            Ok(GridState {
                rows: Arc::new(rows),
                ..state.clone()
            })
        })
    }

    /// Insert, merge or delete individual rows.
    pub fn update_rows(&self, updates: Vec<RowUpdate>) -> Result<()> {
        let getter = self.row_id_getter();
        let engine = &self.inner.engine;
        self.try_update(|state| {
            let rows = state.rows.with_updates(updates, &getter)?;
            engine.queue(GridEvent::RowsSet { row_count: rows.len() });
            Ok(GridState {
                rows: Arc::new(rows),
                ..state.clone()
            })
        })
    }

    /// Replace the column definitions, keeping visibility and pinning.
    pub fn set_columns(&self, columns: Vec<ColumnDef>) {
        self.update(Some(GridEvent::ColumnsChanged), |state| {
            let columns = ColumnsState::new(columns)
                .with_visibility(state.columns.visibility.clone())
                .with_pinned(state.columns.pinned.clone());
            GridState {
                columns: Arc::new(columns),
                ..state.clone()
            }
        });
    }

    /// Show or hide columns.
    pub fn set_column_visibility_model(&self, model: ColumnVisibilityModel) {
        self.update(Some(GridEvent::ColumnsChanged), |state| GridState {
            columns: Arc::new(state.columns.with_visibility(model)),
            ..state.clone()
        });
    }

    /// Pin columns to either edge.
    pub fn set_pinned_columns(&self, pinned: PinnedColumns) {
        self.update(Some(GridEvent::ColumnsChanged), |state| GridState {
            columns: Arc::new(state.columns.with_pinned(pinned)),
            ..state.clone()
        });
    }

    /// Replace the configuration.
    pub fn set_config(&self, config: GridConfig) {
        self.update(None, |state| GridState {
            config: Arc::new(config),
            ..state.clone()
        });
    }

    /// Set the tree-data hierarchy source. Cycles are reported as for
    /// [`set_rows`](Self::set_rows).
    pub fn set_tree_data(&self, source: TreeDataSource) -> Result<()> {
        self.try_update(|state| {
            Ok(GridState {
                tree_data: Arc::new(TreeDataConfig { source: Some(source) }),
                ..state.clone()
            })
        })
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Replace the filter model.
    pub fn set_filter_model(&self, model: FilterModel) {
        if *self.state().filter_model == model {
            return;
        }
        let model = Arc::new(model);
        self.update(Some(GridEvent::FilterModelChanged(model.clone())), |state| GridState {
            filter_model: model,
            ..state.clone()
        });
    }

    /// Replace the sort model.
    pub fn set_sort_model(&self, model: SortModel) {
        if *self.state().sort_model == model {
            return;
        }
        let model = Arc::new(model);
        self.update(Some(GridEvent::SortModelChanged(model.clone())), |state| GridState {
            sort_model: model,
            ..state.clone()
        });
    }

    /// Replace the grouping model.
    pub fn set_grouping_model(&self, model: GroupingModel) {
        if *self.state().grouping_model == model {
            return;
        }
        let model = Arc::new(model);
        self.update(Some(GridEvent::GroupingModelChanged(model.clone())), |state| GridState {
            grouping_model: model,
            ..state.clone()
        });
    }

    /// Replace the aggregation model.
    pub fn set_aggregation_model(&self, model: AggregationModel) {
        if *self.state().aggregation_model == model {
            return;
        }
        let model = Arc::new(model);
        self.update(Some(GridEvent::AggregationModelChanged(model.clone())), |state| GridState {
            aggregation_model: model,
            ..state.clone()
        });
    }

    /// Add or replace an aggregation function.
    pub fn register_aggregation_function(&self, function: AggregationFunction) {
        self.update(None, |state| GridState {
            aggregation_functions: Arc::new(state.aggregation_functions.with(function)),
            ..state.clone()
        });
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Replace the pagination model. Out-of-range pages are clamped.
    pub fn set_pagination_model(&self, model: PaginationModel) {
        if *self.state().pagination_model == model {
            return;
        }
        self.update(Some(GridEvent::PaginationModelChanged(model)), |state| GridState {
            pagination_model: Arc::new(model),
            ..state.clone()
        });
    }

    /// Go to a page.
    pub fn set_page(&self, page: usize) {
        let model = *self.state().pagination_model;
        self.set_pagination_model(PaginationModel { page, ..model });
    }

    /// Change the page size. The size is at least one.
    pub fn set_page_size(&self, page_size: usize) {
        let model = *self.state().pagination_model;
        self.set_pagination_model(PaginationModel {
            page_size: page_size.max(1),
            ..model
        });
    }

    /// Row and page counts.
    pub fn pagination_meta(&self) -> PaginationMeta {
        self.state().pagination_meta
    }

    // =========================================================================
    // Expansion and viewport
    // =========================================================================

    /// Expand or collapse a group.
    pub fn set_row_children_expansion(&self, id: &RowId, expanded: bool) -> Result<()> {
        let state = self.state();
        let is_group = state
            .processed
            .tree
            .get(id)
            .is_some_and(|node| node.kind == RowNodeKind::Group && !id.is_root());
        if !is_group {
            return Err(GridError::UnknownRow(id.clone()));
        }
        let event = GridEvent::RowExpansionChanged {
            id: id.clone(),
            expanded,
        };
        self.update(Some(event), |state| GridState {
            expansion: Arc::new(state.expansion.with(id.clone(), expanded)),
            ..state.clone()
        });
        Ok(())
    }

    /// Set the scroll position and viewport size.
    pub fn set_viewport(&self, viewport: ViewportState) {
        if *self.state().viewport == viewport {
            return;
        }
        self.update(None, |state| GridState {
            viewport: Arc::new(viewport),
            ..state.clone()
        });
    }

    /// Scroll to the given offsets, keeping the viewport size.
    pub fn scroll_to(&self, scroll_top: f64, scroll_left: f64) {
        let viewport = *self.state().viewport;
        self.set_viewport(ViewportState {
            scroll_top: scroll_top.max(0.0),
            scroll_left: scroll_left.max(0.0),
            ..viewport
        });
    }

    /// Scroll so that the row at `index` on the current page is at the top.
    pub fn scroll_to_index(&self, index: usize) {
        let state = self.state();
        let sizes = self.inner.engine.row_sizes(&state);
        self.scroll_to(sizes.start(index.min(sizes.len())), state.viewport.scroll_left);
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Add a processor to a pipeline stage and re-run the pipeline.
    pub fn register_processor(&self, stage: PipelineStage, id: impl Into<String>, processor: Arc<dyn RowProcessor>) {
        self.inner.engine.pipeline.register(stage, id, processor);
        self.update(None, GridState::clone);
    }

    /// Remove a processor and re-run the pipeline.
    pub fn unregister_processor(&self, stage: PipelineStage, id: &str) -> bool {
        let removed = self.inner.engine.pipeline.unregister(stage, id);
        if removed {
            self.update(None, GridState::clone);
        }
        removed
    }

    /// Processor ids of a stage.
    pub fn processor_ids(&self, stage: PipelineStage) -> Vec<String> {
        self.inner.engine.pipeline.processor_ids(stage)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The pipeline output.
    pub fn processed_rows(&self) -> Arc<ProcessedRows> {
        self.state().processed.clone()
    }

    /// Ordered ids on the current page, descendants of collapsed groups
    /// excluded.
    pub fn visible_rows(&self) -> Vec<RowId> {
        self.state().page_rows().to_vec()
    }

    /// The current render window.
    pub fn render_context(&self) -> RenderContext {
        self.state().render_context
    }

    /// A node of the current row tree.
    pub fn row_node(&self, id: &RowId) -> Option<RowNode> {
        self.state().processed.tree.get(id).cloned()
    }

    /// A registered row.
    pub fn row(&self, id: &RowId) -> Option<GridRowModel> {
        self.state().rows.get(id).cloned()
    }

    /// The aggregate of `field` for a group, footer or the root.
    pub fn aggregate(&self, id: &RowId, field: &str) -> Option<CellValue> {
        self.state().processed.aggregates.get(id, field).cloned()
    }

    /// The persistable models.
    pub fn export_state(&self) -> InitialState {
        self.state().export()
    }

    // =========================================================================
    // Data source
    // =========================================================================

    /// Request parameters for rows `start..=end` under the current models.
    pub fn get_rows_params(&self, start: usize, end: usize) -> GetRowsParams {
        let state = self.state();
        GetRowsParams {
            sort_model: (*state.sort_model).clone(),
            filter_model: (*state.filter_model).clone(),
            pagination_model: *state.pagination_model,
            start,
            end,
            cursor: state.rows.next_cursor.clone().filter(|_| start > 0),
            group_fields: state.grouping_model.0.clone(),
            group_keys: Vec::new(),
        }
    }

    /// Mark a data source request as in flight.
    pub fn set_data_source_loading(&self, params: &GetRowsParams) {
        let event = GridEvent::FetchRowsStarted {
            start: params.start,
            end: params.end,
            group_keys: params.group_keys.clone(),
        };
        self.update(Some(event), |state| GridState {
            rows: Arc::new(state.rows.with_fetch_status(true, None)),
            ..state.clone()
        });
    }

    /// Clear the loading flag without applying anything, e.g. after a
    /// response was discarded.
    pub fn clear_data_source_loading(&self) {
        if !self.state().rows.loading {
            return;
        }
        self.update(None, |state| GridState {
            rows: Arc::new(state.rows.with_fetch_status(false, state.rows.error.clone())),
            ..state.clone()
        });
    }

    /// Apply a data source response.
    ///
    /// Child responses (non-empty `group_keys`) are merged into the registry.
    /// With lazy loading, responses are merged at `start`, except a response
    /// for `start == 0` which starts a new listing. Otherwise the response
    /// replaces all rows.
    pub fn apply_data_source_response(&self, params: &GetRowsParams, response: GetRowsResponse) -> Result<()> {
        let getter = self.row_id_getter();
        let engine = &self.inner.engine;
        let (start, end) = (params.start, params.end);
        let children = !params.group_keys.is_empty();
        let received = response.rows.len();

        self.try_update(|state| {
            let lazy = state.config.lazy_loading.enabled;
            let mut rows = if children {
                let updates = response.rows.into_iter().map(RowUpdate::Upsert).collect();
                state.rows.with_updates(updates, &getter)?
            } else if lazy && start > 0 {
                state.rows.with_loaded_range(start, response.rows, &getter)?
            } else {
                RowsState::from_rows(response.rows, &getter)?
            };
            if children {
                rows.total_row_count = state.rows.total_row_count;
            } else {
                rows.total_row_count = response.row_count.or(state.rows.total_row_count.filter(|_| lazy && start > 0));
                let page_info = response.page_info.unwrap_or_default();
                rows.has_next_page = page_info.has_next_page;
                rows.next_cursor = page_info.next_cursor;
            }
            rows.loading = false;
            rows.error = None;

            engine.queue(GridEvent::FetchRowsSucceeded {
                start,
                end,
                row_count: received,
            });
            engine.queue(GridEvent::RowsSet { row_count: rows.len() });
            Ok(GridState {
                rows: Arc::new(rows),
                ..state.clone()
            })
        })
    }

    /// Record a failed request. Loaded rows are kept.
    pub fn apply_data_source_error(&self, params: &GetRowsParams, error: DataSourceError) {
        let event = GridEvent::FetchRowsError {
            start: params.start,
            end: params.end,
            error: error.clone(),
        };
        self.update(Some(event), |state| GridState {
            rows: Arc::new(state.rows.with_fetch_status(false, Some(error))),
            ..state.clone()
        });
    }

    /// Replace one registered row, merging its fields.
    pub(crate) fn patch_row(&self, row: Value) -> Result<()> {
        self.update_rows(vec![RowUpdate::Upsert(row)])
    }
}

impl fmt::Debug for GridApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("GridApi")
            .field("rows", &state.rows.len())
            .field("columns", &state.columns.len())
            .field("pipeline", &self.inner.engine.pipeline)
            .field("version", &self.version())
            .finish()
    }
}

static_assertions::assert_impl_all!(GridApi: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::filter::{FilterItem, LogicOperator};
    use crate::sort::SortItem;
    use serde_json::json;

    fn api() -> GridApi {
        let api = GridApi::new(
            vec![
                ColumnDef::new("age", ColumnType::Number),
                ColumnDef::new("company", ColumnType::String),
            ],
            GridConfig::default(),
        );
        api.set_rows(vec![
            json!({"id": 1, "age": 30, "company": "A"}),
            json!({"id": 2, "age": 25, "company": "A"}),
            json!({"id": 3, "age": 25, "company": "B"}),
        ])
        .unwrap();
        api
    }

    fn ids(values: &[i64]) -> Vec<RowId> {
        values.iter().copied().map(RowId::from).collect()
    }

    #[test]
    fn test_models_drive_visible_rows() {
        let api = api();
        assert_eq!(api.visible_rows(), ids(&[1, 2, 3]));

        api.set_sort_model(SortModel::new(vec![SortItem::asc("age")]));
        assert_eq!(api.visible_rows(), ids(&[2, 3, 1]));

        api.set_filter_model(FilterModel::new(
            vec![FilterItem::new("age", "<", json!(26))],
            LogicOperator::And,
        ));
        assert_eq!(api.visible_rows(), ids(&[2, 3]));
    }

    #[test]
    fn test_events_published_after_batch() {
        let api = api();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        api.subscribe_events(move |event| sink.lock().push(event.name()));

        api.batch(|| {
            api.set_sort_model(SortModel::new(vec![SortItem::desc("age")]));
            api.set_filter_model(FilterModel::new(
                vec![FilterItem::new("age", ">", json!(0))],
                LogicOperator::And,
            ));
            assert!(seen.lock().is_empty());
        });

        let seen = seen.lock();
        assert!(seen.contains(&"sortModelChange"));
        assert!(seen.contains(&"filterModelChange"));
    }

    #[test]
    fn test_page_is_clamped() {
        let api = api();
        api.set_config(GridConfig::default().with_pagination(true));
        api.set_pagination_model(PaginationModel::new(5, 2));
        assert_eq!(*api.state().pagination_model, PaginationModel::new(1, 2));
        assert_eq!(api.visible_rows(), ids(&[3]));
        assert_eq!(api.pagination_meta(), PaginationMeta { row_count: 3, page_count: 2 });
    }

    #[test]
    fn test_duplicate_ids_leave_state_unchanged() {
        let api = api();
        let err = api
            .set_rows(vec![json!({"id": 1}), json!({"id": 1})])
            .unwrap_err();
        assert!(matches!(err, GridError::DuplicateRowId(_)));
        assert_eq!(api.state().rows.len(), 3);
    }

    #[test]
    fn test_expansion_requires_group() {
        let api = api();
        assert!(api.set_row_children_expansion(&RowId::from(1), true).is_err());

        api.set_grouping_model(GroupingModel::new(["company"]));
        let group = RowId::from("auto-generated-row-company/A");
        assert_eq!(api.visible_rows().len(), 2);
        api.set_row_children_expansion(&group, true).unwrap();
        assert_eq!(api.visible_rows().len(), 4);
        assert!(api.row_node(&group).is_some_and(|n| n.children_expanded));
    }
}
