//! Horizon Grid - row/column processing pipeline and virtualization engine
//! for data grids.
//!
//! The engine turns a flat set of row records into the ordered, filtered,
//! grouped, aggregated and paginated sequence a grid renders, and computes
//! which rows and columns are inside the rendered window.
//!
//! - **Pipeline**: hydrate, filter, group, sort, aggregate and paginate
//!   stages, each a registry of replaceable [`RowProcessor`]s recomputed
//!   only when its inputs change
//! - **Row tree**: an id-indexed arena of [`RowNode`]s for flat rows,
//!   groupings and tree data
//! - **Virtualization**: render windows over uniform or variable row sizes
//!   and unpinned columns
//! - **Data source**: cached, de-duplicated server fetches with stale
//!   response discarding and lazy loading
//!
//! Everything is driven through the [`GridApi`] façade.
//!
//! # Example
//!
//! ```
//! use horizon_grid::{
//!     ColumnDef, ColumnType, FilterItem, FilterModel, GridApi, GridConfig, GridEvent,
//!     GroupingModel, LogicOperator, RowId,
//! };
//! use serde_json::json;
//!
//! let api = GridApi::new(
//!     vec![
//!         ColumnDef::new("age", ColumnType::Number),
//!         ColumnDef::new("company", ColumnType::String),
//!     ],
//!     GridConfig::default(),
//! );
//! api.subscribe_events(|event: &GridEvent| println!("{}", event.name()));
//!
//! api.set_rows(vec![
//!     json!({"id": 1, "age": 30, "company": "A"}),
//!     json!({"id": 2, "age": 25, "company": "A"}),
//!     json!({"id": 3, "age": 25, "company": "B"}),
//! ])?;
//!
//! api.set_filter_model(FilterModel::new(
//!     vec![FilterItem::new("age", ">", json!(26))],
//!     LogicOperator::And,
//! ));
//! assert_eq!(api.visible_rows(), vec![RowId::from(1)]);
//!
//! api.set_filter_model(FilterModel::default());
//! api.set_grouping_model(GroupingModel::new(["company"]));
//! assert_eq!(api.processed_rows().tree.top_level().len(), 2);
//! # Ok::<(), horizon_grid::GridError>(())
//! ```

pub mod api;
pub mod column;
pub mod config;
pub mod data_source;
mod error;
pub mod event;
pub mod filter;
pub mod grouping;
pub mod logging;
pub mod pagination;
pub mod pipeline;
pub mod rows;
pub mod sort;
pub mod state;
pub mod tree;
pub mod value;
pub mod virtualization;

pub use api::GridApi;
pub use column::{ColumnDef, ColumnLayout, ColumnType, ColumnVisibilityModel, ColumnsState, PinnedColumns};
pub use config::{
    AggregationRowsScope, Density, GridConfig, LazyLoadingConfig, LazyLoadingMode, NullsPosition, ProcessingMode,
};
pub use data_source::{
    DataSource, DataSourceCache, DataSourceManager, DefaultDataSourceCache, FetchOutcome, GetRowsParams,
    GetRowsResponse, LazyLoader, NoopDataSourceCache, PageInfo,
};
pub use error::{DataSourceError, GridError, GridWarning, Result, StructuralError};
pub use event::GridEvent;
pub use filter::{FilterItem, FilterModel, FilterOperator, FilterResult, LogicOperator};
pub use grouping::aggregation::{AggregationFunction, AggregationLookup, AggregationModel, AggregationRegistry};
pub use grouping::{GroupingModel, TreeDataSource};
pub use logging::RowTreeDebug;
pub use pagination::{PageRange, PaginationMeta, PaginationModel};
pub use pipeline::{PipelineRegistry, PipelineStage, ProcessedRows, ProcessingContext, RowProcessor};
pub use rows::{GridRowModel, RowUpdate, RowsState};
pub use sort::{SortDirection, SortItem, SortModel};
pub use state::{GridState, InitialState};
pub use tree::{ExpansionState, RowNode, RowNodeKind, RowTree, TreeKind};
pub use value::{CellValue, RowId};
pub use virtualization::{IndexRange, RenderContext, RowSizes, ViewportState, VirtualScroller};

pub use horizon_grid_core::{ConnectionGuard, ConnectionId, SubscriptionId};
