//! Pipeline processor registry.
//!
//! Row processing runs as a fixed sequence of stages:
//!
//! ```text
//! hydrateRows -> filter -> group -> sort -> aggregate -> paginate
//! ```
//!
//! Each stage holds an ordered set of named [`RowProcessor`]s that transform
//! the previous stage's [`ProcessedRows`]. A stage with no processors passes
//! its input through. Stage outputs are memoized on the identity of the
//! stage input, the stage's processor set and every dependency the
//! processors declare, so a stage re-runs only when one of those changed.

mod processors;

use std::fmt;
use std::sync::Arc;

use horizon_grid_core::{DepKey, Memo, PerfSpan};
use parking_lot::RwLock;

pub use processors::{
    AggregationProcessor, FilterProcessor, GroupingProcessor, HydrationProcessor, PaginationProcessor,
    SortProcessor,
};

use crate::error::{GridWarning, StructuralError};
use crate::filter::FilterResult;
use crate::grouping::GroupMembership;
use crate::grouping::aggregation::AggregationLookup;
use crate::logging::targets;
use crate::pagination::PageRange;
use crate::state::GridState;
use crate::tree::RowTree;
use crate::value::RowId;

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineStage {
    /// Read the row registry.
    HydrateRows,
    /// Evaluate the filter model.
    Filter,
    /// Build the row tree.
    Group,
    /// Order siblings.
    Sort,
    /// Compute group aggregates.
    Aggregate,
    /// Apply expansion and slice the current page.
    Paginate,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [PipelineStage; 6] = [
        Self::HydrateRows,
        Self::Filter,
        Self::Group,
        Self::Sort,
        Self::Aggregate,
        Self::Paginate,
    ];

    /// Stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HydrateRows => "hydrateRows",
            Self::Filter => "filter",
            Self::Group => "group",
            Self::Sort => "sort",
            Self::Aggregate => "aggregate",
            Self::Paginate => "paginate",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value carried through the pipeline.
///
/// Every part sits behind its own `Arc`; a processor that leaves a part
/// alone keeps the same `Arc`, which lets downstream consumers compare by
/// reference.
#[derive(Debug, Clone, Default)]
pub struct ProcessedRows {
    /// Registered row ids in ingestion order.
    pub row_ids: Arc<Vec<RowId>>,
    /// Rows that passed the filter.
    pub filter: Arc<FilterResult>,
    /// The row tree.
    pub tree: Arc<RowTree>,
    /// Unfiltered leaves per group, when aggregating over all rows.
    pub membership: Arc<Option<GroupMembership>>,
    /// Aggregated values per group.
    pub aggregates: Arc<AggregationLookup>,
    /// Expanded pre-order of `tree`.
    pub visible_rows: Arc<Vec<RowId>>,
    /// Slice of `visible_rows` on the current page, `None` when empty.
    pub page_range: Option<PageRange>,
}

impl ProcessedRows {
    /// Copy with a new tree. Visible rows are re-flattened and the page
    /// range reset to everything.
    pub fn with_tree(&self, tree: RowTree) -> Self {
        let visible = tree.flatten_expanded();
        Self {
            page_range: PageRange::full(visible.len()),
            visible_rows: Arc::new(visible),
            tree: Arc::new(tree),
            ..self.clone()
        }
    }

    /// Ordered ids on the current page.
    pub fn page_rows(&self) -> &[RowId] {
        match self.page_range {
            Some(range) => range.slice(&self.visible_rows),
            None => &[],
        }
    }

    /// Number of top-level entries.
    pub fn top_level_count(&self) -> usize {
        self.tree.top_level().len()
    }

    fn same_as(&self, other: &ProcessedRows) -> bool {
        Arc::ptr_eq(&self.row_ids, &other.row_ids)
            && Arc::ptr_eq(&self.filter, &other.filter)
            && Arc::ptr_eq(&self.tree, &other.tree)
            && Arc::ptr_eq(&self.membership, &other.membership)
            && Arc::ptr_eq(&self.aggregates, &other.aggregates)
            && Arc::ptr_eq(&self.visible_rows, &other.visible_rows)
            && self.page_range == other.page_range
    }
}

/// Collects what a processor reports besides its output.
#[derive(Debug)]
pub struct ProcessingContext {
    stage: PipelineStage,
    warnings: Vec<GridWarning>,
    errors: Vec<StructuralError>,
}

impl ProcessingContext {
    fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// The stage being processed.
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Report skipped model entries.
    pub fn warn(&mut self, warnings: impl IntoIterator<Item = GridWarning>) {
        self.warnings.extend(warnings);
    }

    /// Report rows left out for structural reasons.
    pub fn error(&mut self, errors: impl IntoIterator<Item = StructuralError>) {
        self.errors.extend(errors);
    }
}

/// A row transform registered in a pipeline stage.
pub trait RowProcessor: Send + Sync {
    /// State slices the output depends on, compared by reference.
    fn dependencies(&self, state: &GridState) -> Vec<DepKey>;

    /// Transform `input`.
    fn process(&self, input: &ProcessedRows, state: &GridState, ctx: &mut ProcessingContext) -> ProcessedRows;
}

type ProcessorSet = Arc<Vec<(String, Arc<dyn RowProcessor>)>>;

#[derive(Clone)]
struct StageOutput {
    rows: Arc<ProcessedRows>,
    warnings: Arc<Vec<GridWarning>>,
    errors: Arc<Vec<StructuralError>>,
}

struct StageSlot {
    stage: PipelineStage,
    processors: RwLock<ProcessorSet>,
    memo: Memo<StageOutput>,
}

impl StageSlot {
    fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            processors: RwLock::new(Arc::default()),
            memo: Memo::new(stage.as_str()),
        }
    }
}

/// What a stage reported when it re-ran.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    /// The stage.
    pub stage: PipelineStage,
    /// Skipped model entries.
    pub warnings: Vec<GridWarning>,
    /// Rows left out for structural reasons.
    pub errors: Vec<StructuralError>,
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Output of the last stage.
    pub output: Arc<ProcessedRows>,
    /// One report per stage that re-ran, in stage order.
    pub reports: Vec<StageReport>,
}

impl PipelineRun {
    /// Whether `stage` re-ran.
    pub fn recomputed(&self, stage: PipelineStage) -> bool {
        self.reports.iter().any(|r| r.stage == stage)
    }
}

/// The ordered set of stages and their processors.
pub struct PipelineRegistry {
    stages: [StageSlot; 6],
    seed: Arc<ProcessedRows>,
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRegistry {
    /// A registry with no processors: every stage passes through.
    pub fn new() -> Self {
        Self {
            stages: PipelineStage::ALL.map(StageSlot::new),
            seed: Arc::default(),
        }
    }

    /// A registry with the built-in processor in every stage.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(PipelineStage::HydrateRows, "hydration", Arc::new(HydrationProcessor));
        registry.register(PipelineStage::Filter, "filtering", Arc::new(FilterProcessor));
        registry.register(PipelineStage::Group, "rowGrouping", Arc::new(GroupingProcessor));
        registry.register(PipelineStage::Sort, "sorting", Arc::new(SortProcessor));
        registry.register(PipelineStage::Aggregate, "aggregation", Arc::new(AggregationProcessor));
        registry.register(PipelineStage::Paginate, "pagination", Arc::new(PaginationProcessor));
        registry
    }

    /// Add a processor to a stage, replacing one with the same id in place.
    pub fn register(&self, stage: PipelineStage, id: impl Into<String>, processor: Arc<dyn RowProcessor>) {
        let id = id.into();
        let slot = &self.stages[stage.index()];
        let mut processors = slot.processors.write();
        let mut next = (**processors).clone();
        match next.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = processor,
            None => next.push((id.clone(), processor)),
        }
        *processors = Arc::new(next);
        tracing::debug!(target: targets::PIPELINE, stage = %stage, processor = %id, "registered processor");
    }

    /// Remove a processor. Returns `false` if it was not registered.
    pub fn unregister(&self, stage: PipelineStage, id: &str) -> bool {
        let slot = &self.stages[stage.index()];
        let mut processors = slot.processors.write();
        if !processors.iter().any(|(existing, _)| existing == id) {
            return false;
        }
        let next: Vec<_> = processors
            .iter()
            .filter(|(existing, _)| existing != id)
            .cloned()
            .collect();
        *processors = Arc::new(next);
        tracing::debug!(target: targets::PIPELINE, stage = %stage, processor = id, "unregistered processor");
        true
    }

    /// Processor ids of a stage, in run order.
    pub fn processor_ids(&self, stage: PipelineStage) -> Vec<String> {
        self.stages[stage.index()]
            .processors
            .read()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop all memoized stage outputs.
    pub fn invalidate(&self) {
        for slot in &self.stages {
            slot.memo.invalidate();
        }
    }

    /// Run every stage against `state`, re-running only stages whose
    /// dependencies changed.
    pub fn run(&self, state: &GridState) -> PipelineRun {
        let mut input = self.seed.clone();
        let mut reports = Vec::new();

        for slot in &self.stages {
            let processors = slot.processors.read().clone();
            if processors.is_empty() {
                continue;
            }

            let mut deps = vec![DepKey::of(&input), DepKey::of(&processors)];
            for (_, processor) in processors.iter() {
                deps.extend(processor.dependencies(state));
            }

            let mut recomputed = false;
            let output = slot.memo.get_or_compute(deps, || {
                recomputed = true;
                let _span = PerfSpan::new(slot.stage.as_str());
                let mut ctx = ProcessingContext::new(slot.stage);
                let mut current = input.clone();
                for (_, processor) in processors.iter() {
                    let next = processor.process(&current, state, &mut ctx);
                    if !next.same_as(&current) {
                        current = Arc::new(next);
                    }
                }
                StageOutput {
                    rows: current,
                    warnings: Arc::new(ctx.warnings),
                    errors: Arc::new(ctx.errors),
                }
            });

            if recomputed {
                tracing::debug!(
                    target: targets::PIPELINE,
                    stage = %slot.stage,
                    changed = !Arc::ptr_eq(&output.rows, &input),
                    warnings = output.warnings.len(),
                    "stage recomputed"
                );
                reports.push(StageReport {
                    stage: slot.stage,
                    warnings: output.warnings.to_vec(),
                    errors: output.errors.to_vec(),
                });
            }
            input = output.rows;
        }

        PipelineRun { output: input, reports }
    }
}

impl fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in &self.stages {
            map.entry(&slot.stage.as_str(), &self.processor_ids(slot.stage));
        }
        map.finish()
    }
}

static_assertions::assert_impl_all!(PipelineRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnDef, ColumnType, ColumnsState};
    use crate::config::GridConfig;
    use crate::filter::{FilterItem, FilterModel, LogicOperator};
    use crate::rows::{RowsState, default_row_id_getter};
    use crate::sort::{SortItem, SortModel};
    use serde_json::json;

    fn state() -> GridState {
        let columns = ColumnsState::new(vec![ColumnDef::new("age", ColumnType::Number)]);
        let mut state = GridState::new(columns, GridConfig::default());
        state.rows = Arc::new(
            RowsState::from_rows(
                vec![json!({"id": 1, "age": 30}), json!({"id": 2, "age": 25}), json!({"id": 3, "age": 25})],
                &default_row_id_getter(),
            )
            .unwrap(),
        );
        state
    }

    #[test]
    fn test_default_pipeline() {
        let registry = PipelineRegistry::with_defaults();
        let mut state = state();
        state.sort_model = Arc::new(SortModel::new(vec![SortItem::asc("age")]));
        let run = registry.run(&state);
        assert_eq!(run.output.page_rows(), &[RowId::Int(2), RowId::Int(3), RowId::Int(1)][..]);
        assert_eq!(run.reports.len(), 6);
    }

    #[test]
    fn test_only_dependent_stages_rerun() {
        let registry = PipelineRegistry::with_defaults();
        let mut state = state();
        let first = registry.run(&state);

        let again = registry.run(&state);
        assert!(again.reports.is_empty());
        assert!(Arc::ptr_eq(&first.output, &again.output));

        state.sort_model = Arc::new(SortModel::new(vec![SortItem::desc("age")]));
        let sorted = registry.run(&state);
        let stages: Vec<_> = sorted.reports.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![PipelineStage::Sort, PipelineStage::Aggregate, PipelineStage::Paginate]
        );
        assert_eq!(sorted.output.page_rows()[0], RowId::Int(1));
    }

    #[test]
    fn test_empty_stage_passes_through() {
        let registry = PipelineRegistry::with_defaults();
        let mut state = state();
        state.filter_model = Arc::new(FilterModel::new(
            vec![FilterItem::new("age", ">", json!(26))],
            LogicOperator::And,
        ));
        assert_eq!(registry.run(&state).output.page_rows().len(), 1);

        assert!(registry.unregister(PipelineStage::Filter, "filtering"));
        assert!(!registry.unregister(PipelineStage::Filter, "filtering"));
        assert_eq!(registry.run(&state).output.page_rows().len(), 3);
        assert!(registry.processor_ids(PipelineStage::Filter).is_empty());
    }

    struct KeepEven;

    impl RowProcessor for KeepEven {
        fn dependencies(&self, state: &GridState) -> Vec<DepKey> {
            vec![DepKey::of(&state.rows)]
        }

        fn process(&self, input: &ProcessedRows, _state: &GridState, _ctx: &mut ProcessingContext) -> ProcessedRows {
            let ids: Vec<RowId> = input
                .filter
                .passing()
                .iter()
                .filter(|id| matches!(id, RowId::Int(n) if n % 2 == 0))
                .cloned()
                .collect();
            ProcessedRows {
                filter: Arc::new(FilterResult::all(&ids)),
                ..input.clone()
            }
        }
    }

    #[test]
    fn test_custom_processor_chains_after_builtin() {
        let registry = PipelineRegistry::with_defaults();
        registry.register(PipelineStage::Filter, "even", Arc::new(KeepEven));
        assert_eq!(registry.processor_ids(PipelineStage::Filter), vec!["filtering", "even"]);
        let run = registry.run(&state());
        assert_eq!(run.output.page_rows(), &[RowId::Int(2)][..]);
    }
}
