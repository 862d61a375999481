//! Events published by the grid.

use std::sync::Arc;

use crate::error::{DataSourceError, GridWarning, StructuralError};
use crate::filter::FilterModel;
use crate::grouping::GroupingModel;
use crate::grouping::aggregation::AggregationModel;
use crate::pagination::PaginationModel;
use crate::sort::SortModel;
use crate::tree::TreeKind;
use crate::value::RowId;
use crate::virtualization::RenderContext;

/// Everything the engine announces to rendering, toolbar and export
/// collaborators.
///
/// Events raised during a batch are delivered after it settles, in the order
/// they were raised.
#[derive(Debug, Clone, PartialEq)]
pub enum GridEvent {
    /// The row collection was replaced or updated.
    RowsSet {
        /// Rows now registered.
        row_count: usize,
    },
    /// The grouping stage produced a new row tree.
    RowTreeRebuilt {
        /// How the tree was built.
        kind: TreeKind,
        /// Nodes in the tree, root excluded.
        node_count: usize,
    },
    /// The filter model changed.
    FilterModelChanged(Arc<FilterModel>),
    /// The sort model changed.
    SortModelChanged(Arc<SortModel>),
    /// The grouping model changed.
    GroupingModelChanged(Arc<GroupingModel>),
    /// The pagination model changed, by the host or by clamping.
    PaginationModelChanged(PaginationModel),
    /// The aggregation model changed.
    AggregationModelChanged(Arc<AggregationModel>),
    /// A group was expanded or collapsed.
    RowExpansionChanged {
        /// The group.
        id: RowId,
        /// New state.
        expanded: bool,
    },
    /// Column definitions, visibility or pinning changed.
    ColumnsChanged,
    /// The render window changed.
    RenderedRowsIntervalChange(RenderContext),
    /// The viewport reached the last row of the page.
    RowsScrollEnd {
        /// Rows on the current page.
        visible_row_count: usize,
    },
    /// A data source request was sent.
    FetchRowsStarted {
        /// First requested index.
        start: usize,
        /// Last requested index.
        end: usize,
        /// Group path for child fetches.
        group_keys: Vec<String>,
    },
    /// A data source response was applied.
    FetchRowsSucceeded {
        /// First requested index.
        start: usize,
        /// Last requested index.
        end: usize,
        /// Rows in the response.
        row_count: usize,
    },
    /// A data source request failed. Loaded rows are kept.
    FetchRowsError {
        /// First requested index.
        start: usize,
        /// Last requested index.
        end: usize,
        /// The failure.
        error: DataSourceError,
    },
    /// A model entry was skipped.
    Warning(GridWarning),
    /// Rows were left out of the tree because of a structural problem.
    TreeDataError(StructuralError),
}

impl GridEvent {
    /// Stable event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RowsSet { .. } => "rowsSet",
            Self::RowTreeRebuilt { .. } => "rowTreeRebuilt",
            Self::FilterModelChanged(_) => "filterModelChange",
            Self::SortModelChanged(_) => "sortModelChange",
            Self::GroupingModelChanged(_) => "rowGroupingModelChange",
            Self::PaginationModelChanged(_) => "paginationModelChange",
            Self::AggregationModelChanged(_) => "aggregationModelChange",
            Self::RowExpansionChanged { .. } => "rowExpansionChange",
            Self::ColumnsChanged => "columnsChange",
            Self::RenderedRowsIntervalChange(_) => "renderedRowsIntervalChange",
            Self::RowsScrollEnd { .. } => "rowsScrollEnd",
            Self::FetchRowsStarted { .. } => "fetchRowsStart",
            Self::FetchRowsSucceeded { .. } => "fetchRowsSuccess",
            Self::FetchRowsError { .. } => "fetchRowsError",
            Self::Warning(_) => "warning",
            Self::TreeDataError(_) => "treeDataError",
        }
    }
}
