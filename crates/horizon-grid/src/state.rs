//! The grid state snapshot.
//!
//! [`GridState`] is what the [`Store`](horizon_grid_core::Store) holds. Input
//! slices are behind their own `Arc` so pipeline stages can tell by reference
//! whether a slice changed. Derived slices are written only by the engine's
//! commit hook.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::column::{ColumnLayout, ColumnVisibilityModel, ColumnsState, PinnedColumns};
use crate::config::GridConfig;
use crate::error::Result;
use crate::filter::FilterModel;
use crate::grouping::aggregation::{AggregationModel, AggregationRegistry};
use crate::grouping::{GroupingModel, TreeDataSource};
use crate::pagination::{PaginationMeta, PaginationModel};
use crate::pipeline::ProcessedRows;
use crate::rows::RowsState;
use crate::sort::SortModel;
use crate::tree::ExpansionState;
use crate::value::RowId;
use crate::virtualization::{RenderContext, ViewportState};

/// Tree-data hierarchy source.
#[derive(Debug, Clone, Default)]
pub struct TreeDataConfig {
    /// Path or parent-id function, used when `GridConfig::tree_data` is set.
    pub source: Option<TreeDataSource>,
}

/// One complete, immutable grid snapshot.
#[derive(Debug, Clone)]
pub struct GridState {
    /// Row registry.
    pub rows: Arc<RowsState>,
    /// Column model with visibility and pinning.
    pub columns: Arc<ColumnsState>,
    /// Filter model.
    pub filter_model: Arc<FilterModel>,
    /// Sort model.
    pub sort_model: Arc<SortModel>,
    /// Grouping model.
    pub grouping_model: Arc<GroupingModel>,
    /// Aggregation model.
    pub aggregation_model: Arc<AggregationModel>,
    /// Registered aggregation functions.
    pub aggregation_functions: Arc<AggregationRegistry>,
    /// Pagination model, clamped by the engine.
    pub pagination_model: Arc<PaginationModel>,
    /// Group expansion overrides.
    pub expansion: Arc<ExpansionState>,
    /// Tree-data source.
    pub tree_data: Arc<TreeDataConfig>,
    /// Scroll position and viewport size.
    pub viewport: Arc<ViewportState>,
    /// Engine configuration.
    pub config: Arc<GridConfig>,

    /// Pipeline output.
    pub processed: Arc<ProcessedRows>,
    /// Row and page counts.
    pub pagination_meta: PaginationMeta,
    /// Column widths and offsets.
    pub column_layout: Arc<ColumnLayout>,
    /// Rows and columns to materialize.
    pub render_context: RenderContext,
}

impl GridState {
    /// A snapshot with no rows.
    pub fn new(columns: ColumnsState, config: GridConfig) -> Self {
        Self {
            rows: Arc::new(RowsState::default()),
            columns: Arc::new(columns),
            filter_model: Arc::default(),
            sort_model: Arc::default(),
            grouping_model: Arc::default(),
            aggregation_model: Arc::default(),
            aggregation_functions: Arc::default(),
            pagination_model: Arc::default(),
            expansion: Arc::default(),
            tree_data: Arc::default(),
            viewport: Arc::default(),
            config: Arc::new(config),
            processed: Arc::default(),
            pagination_meta: PaginationMeta::default(),
            column_layout: Arc::default(),
            render_context: RenderContext::default(),
        }
    }

    /// Copy with the models of `initial` applied.
    pub fn with_initial_state(&self, initial: &InitialState) -> Self {
        let columns = self
            .columns
            .with_visibility(initial.column_visibility_model.clone())
            .with_pinned(initial.pinned_columns.clone());
        Self {
            columns: Arc::new(columns),
            filter_model: Arc::new(initial.filter_model.clone()),
            sort_model: Arc::new(initial.sort_model.clone()),
            grouping_model: Arc::new(initial.grouping_model.clone()),
            aggregation_model: Arc::new(initial.aggregation_model.clone()),
            pagination_model: Arc::new(initial.pagination_model),
            ..self.clone()
        }
    }

    /// The persistable part of this snapshot.
    pub fn export(&self) -> InitialState {
        InitialState {
            filter_model: (*self.filter_model).clone(),
            sort_model: (*self.sort_model).clone(),
            grouping_model: (*self.grouping_model).clone(),
            pagination_model: *self.pagination_model,
            column_visibility_model: self.columns.visibility.clone(),
            pinned_columns: self.columns.pinned.clone(),
            aggregation_model: (*self.aggregation_model).clone(),
        }
    }

    /// Ordered ids on the current page.
    pub fn page_rows(&self) -> &[RowId] {
        self.processed.page_rows()
    }
}

/// Serializable models a grid can be restored from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitialState {
    /// Filter model.
    pub filter_model: FilterModel,
    /// Sort model.
    pub sort_model: SortModel,
    /// Grouping model.
    pub grouping_model: GroupingModel,
    /// Pagination model.
    pub pagination_model: PaginationModel,
    /// Column visibility overrides.
    pub column_visibility_model: ColumnVisibilityModel,
    /// Pinned columns.
    pub pinned_columns: PinnedColumns,
    /// Aggregation model.
    pub aggregation_model: AggregationModel,
}

impl InitialState {
    /// Parse from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterItem, LogicOperator};
    use crate::sort::SortItem;
    use serde_json::json;

    #[test]
    fn test_initial_state_round_trip() {
        let text = r#"{
            "filterModel": {"items": [{"field": "age", "operator": ">", "value": 26}], "logicOperator": "and"},
            "sortModel": [{"field": "age", "sort": "desc"}],
            "groupingModel": ["company"],
            "paginationModel": {"page": 1, "pageSize": 25},
            "columnVisibilityModel": {"age": false},
            "pinnedColumns": {"left": ["name"]},
            "aggregationModel": {"age": "max"}
        }"#;
        let initial = InitialState::from_json(text).unwrap();
        assert_eq!(
            initial.filter_model,
            FilterModel::new(vec![FilterItem::new("age", ">", json!(26))], LogicOperator::And)
        );
        assert_eq!(initial.sort_model, SortModel::new(vec![SortItem::desc("age")]));
        assert_eq!(initial.pagination_model, PaginationModel::new(1, 25));
        assert_eq!(initial.pinned_columns.left, vec!["name".to_string()]);

        let state = GridState::new(ColumnsState::default(), GridConfig::default()).with_initial_state(&initial);
        assert_eq!(state.export(), initial);
        assert_eq!(InitialState::from_json(&initial.to_json().unwrap()).unwrap(), initial);
    }

    #[test]
    fn test_missing_fields_default() {
        let initial = InitialState::from_json("{}").unwrap();
        assert_eq!(initial, InitialState::default());
        assert!(InitialState::from_json("[").is_err());
    }
}
