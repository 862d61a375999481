//! Built-in processors, one per stage.

use std::sync::Arc;

use horizon_grid_core::DepKey;

use super::{ProcessedRows, ProcessingContext, RowProcessor};
use crate::config::{AggregationRowsScope, ProcessingMode};
use crate::filter::{FilterResult, filter_rows};
use crate::grouping::aggregation::aggregate_tree;
use crate::grouping::{GroupingInput, build_row_tree};
use crate::pagination::{PageRange, page_range};
use crate::sort::RowComparator;
use crate::state::GridState;
use crate::tree::RowTree;

/// Reads the registered rows into a flat tree.
#[derive(Debug, Default)]
pub struct HydrationProcessor;

impl RowProcessor for HydrationProcessor {
    fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
        vec![DepKey::of(&state.rows)]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, _ctx: &mut ProcessingContext) -> ProcessedRows {
        let ids = state.rows.ids().clone();
        ProcessedRows {
            filter: Arc::new(FilterResult::all(&ids)),
            row_ids: ids.clone(),
            membership: Arc::default(),
            aggregates: Arc::default(),
            ..input.clone()
        }
        .with_tree(RowTree::flat(&ids))
    }
}

/// Evaluates the filter model. Passes rows through in server filter mode.
#[derive(Debug, Default)]
pub struct FilterProcessor;

impl RowProcessor for FilterProcessor {
    fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
        vec![
            DepKey::of(&state.rows),
            DepKey::of(&state.columns),
            DepKey::of(&state.filter_model),
            DepKey::of(&state.config),
        ]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, ctx: &mut ProcessingContext) -> ProcessedRows {
        if state.config.filter_mode == ProcessingMode::Server || state.filter_model.is_empty() {
            return input.clone();
        }
        let outcome = filter_rows(&input.row_ids, &state.rows, &state.columns, &state.filter_model);
        ctx.warn(outcome.warnings);
        let tree = RowTree::flat(outcome.result.passing());
        ProcessedRows {
            filter: Arc::new(outcome.result),
            ..input.clone()
        }
        .with_tree(tree)
    }
}

/// Builds the row tree from the grouping model or tree-data source.
#[derive(Debug, Default)]
pub struct GroupingProcessor;

impl RowProcessor for GroupingProcessor {
    fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
        vec![
            DepKey::of(&state.rows),
            DepKey::of(&state.columns),
            DepKey::of(&state.grouping_model),
            DepKey::of(&state.tree_data),
            DepKey::of(&state.config),
        ]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, ctx: &mut ProcessingContext) -> ProcessedRows {
        let grouping = GroupingInput {
            rows: &state.rows,
            columns: &state.columns,
            candidates: &input.row_ids,
            filter: &input.filter,
            config: &state.config,
        };
        let build = build_row_tree(&grouping, &state.grouping_model, state.tree_data.source.as_ref());
        ctx.warn(build.warnings);
        ctx.error(build.errors);
        ProcessedRows {
            membership: Arc::new(build.membership),
            ..input.clone()
        }
        .with_tree(build.tree)
    }
}

/// Orders the children of every tree node. Passes rows through in server
/// sorting mode.
#[derive(Debug, Default)]
pub struct SortProcessor;

impl RowProcessor for SortProcessor {
    fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
        vec![
            DepKey::of(&state.rows),
            DepKey::of(&state.columns),
            DepKey::of(&state.sort_model),
            DepKey::of(&state.config),
        ]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, ctx: &mut ProcessingContext) -> ProcessedRows {
        if state.config.sorting_mode == ProcessingMode::Server {
            return input.clone();
        }
        let (comparator, warnings) = RowComparator::new(&state.sort_model, &state.columns, state.config.nulls_position);
        ctx.warn(warnings);
        match comparator.sort_tree(&input.tree, &state.rows) {
            Some(tree) => input.with_tree(tree),
            None => input.clone(),
        }
    }
}

/// Computes aggregates for every group and the root.
#[derive(Debug, Default)]
pub struct AggregationProcessor;

impl RowProcessor for AggregationProcessor {
    fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
        vec![
            DepKey::of(&state.rows),
            DepKey::of(&state.columns),
            DepKey::of(&state.aggregation_model),
            DepKey::of(&state.aggregation_functions),
            DepKey::of(&state.config),
        ]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, ctx: &mut ProcessingContext) -> ProcessedRows {
        if state.aggregation_model.is_empty() && input.aggregates.is_empty() {
            return input.clone();
        }
        let membership = match state.config.aggregation_rows_scope {
            AggregationRowsScope::All => (*input.membership).as_ref(),
            AggregationRowsScope::Filtered => None,
        };
        let (lookup, warnings) = aggregate_tree(
            &input.tree,
            &state.rows,
            &state.columns,
            &state.aggregation_model,
            &state.aggregation_functions,
            membership,
        );
        ctx.warn(warnings);
        ProcessedRows {
            aggregates: Arc::new(lookup),
            ..input.clone()
        }
    }
}

/// Applies expansion state and computes the page range.
#[derive(Debug, Default)]
pub struct PaginationProcessor;

impl RowProcessor for PaginationProcessor {
    fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
        vec![
            DepKey::of(&state.pagination_model),
            DepKey::of(&state.expansion),
            DepKey::of(&state.config),
        ]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, _ctx: &mut ProcessingContext) -> ProcessedRows {
        let config = &state.config;
        let expanded = input
            .tree
            .with_expansion(&state.expansion, config.default_group_expansion_depth)
            .map(|tree| input.with_tree(tree));
        let rows = expanded.as_ref().unwrap_or(input);

        let range = if config.pagination && config.pagination_mode == ProcessingMode::Client {
            page_range(&rows.tree, &rows.visible_rows, *state.pagination_model)
        } else {
            PageRange::full(rows.visible_rows.len())
        };
        if expanded.is_none() && range == input.page_range {
            return input.clone();
        }
        ProcessedRows {
            page_range: range,
            ..rows.clone()
        }
    }
}
