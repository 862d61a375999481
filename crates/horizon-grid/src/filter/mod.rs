//! Filter engine.
//!
//! A [`FilterModel`] is compiled against the column model into a list of
//! active predicates, then evaluated row by row. Items that reference unknown
//! fields or operators are reported as warnings and skipped; items whose
//! operator needs a value they do not have are inactive. Neither can make a
//! row fail.

pub mod operators;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::{ColumnDef, ColumnsState};
use crate::error::GridWarning;
use crate::logging::targets;
use crate::rows::RowsState;
use crate::value::{CellValue, RowId};

/// A compiled filter: `(cell value, row) -> passes`.
pub type CellPredicate = Box<dyn Fn(&CellValue, &Value) -> bool + Send + Sync>;

type ApplyFilterFn = Arc<dyn Fn(&Value) -> Option<CellPredicate> + Send + Sync>;

/// Box a closure as a [`CellPredicate`].
pub fn cell_predicate<F>(f: F) -> CellPredicate
where
    F: Fn(&CellValue, &Value) -> bool + Send + Sync + 'static,
{
    Box::new(f)
}

/// A named filter operator.
#[derive(Clone)]
pub struct FilterOperator {
    /// Operator value referenced by filter items.
    pub value: String,
    /// Whether a filter item needs a value for this operator to be active.
    pub requires_value: bool,
    apply: ApplyFilterFn,
}

impl FilterOperator {
    /// An operator that needs a value.
    ///
    /// `build` receives the item's value and returns `None` when the value
    /// cannot be used, which makes the item inactive.
    pub fn new<F>(value: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Value) -> Option<CellPredicate> + Send + Sync + 'static,
    {
        Self {
            value: value.into(),
            requires_value: true,
            apply: Arc::new(build),
        }
    }

    /// An operator that ignores the item's value.
    pub fn without_value<F>(value: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Value) -> Option<CellPredicate> + Send + Sync + 'static,
    {
        Self {
            requires_value: false,
            ..Self::new(value, build)
        }
    }

    /// Compile the operator for a filter item value.
    pub fn predicate(&self, value: Option<&Value>) -> Option<CellPredicate> {
        match value {
            None | Some(Value::Null) if self.requires_value => None,
            Some(Value::String(s)) if self.requires_value && s.is_empty() => None,
            Some(v) => (self.apply)(v),
            None => (self.apply)(&Value::Null),
        }
    }
}

impl fmt::Debug for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterOperator")
            .field("value", &self.value)
            .field("requires_value", &self.requires_value)
            .finish_non_exhaustive()
    }
}

/// How several conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicOperator {
    /// All must pass.
    #[default]
    #[serde(alias = "AND")]
    And,
    /// At least one must pass.
    #[serde(alias = "OR")]
    Or,
}

/// One filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterItem {
    /// Column field.
    pub field: String,
    /// Operator value.
    pub operator: String,
    /// Operand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FilterItem {
    /// Create an item.
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: Some(value),
        }
    }
}

/// The filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterModel {
    /// Conditions in order.
    pub items: Vec<FilterItem>,
    /// How items combine.
    #[serde(alias = "linkOperator")]
    pub logic_operator: LogicOperator,
    /// Free-text values matched against every visible filterable column.
    pub quick_filter_values: Vec<String>,
    /// How quick filter values combine.
    #[serde(alias = "quickFilterLinkOperator")]
    pub quick_filter_logic_operator: LogicOperator,
}

impl FilterModel {
    /// A model with the given items combined by `logic_operator`.
    pub fn new(items: Vec<FilterItem>, logic_operator: LogicOperator) -> Self {
        Self {
            items,
            logic_operator,
            ..Self::default()
        }
    }

    /// Returns `true` if the model has no items and no quick filter.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.quick_filter_values.iter().all(|v| v.trim().is_empty())
    }
}

/// Rows that passed the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterResult {
    passing: Vec<RowId>,
    lookup: HashSet<RowId>,
}

impl FilterResult {
    /// Every id passes.
    pub fn all(ids: &[RowId]) -> Self {
        Self {
            passing: ids.to_vec(),
            lookup: ids.iter().cloned().collect(),
        }
    }

    /// Passing ids in input order.
    pub fn passing(&self) -> &[RowId] {
        &self.passing
    }

    /// Whether an id passed.
    pub fn passes(&self, id: &RowId) -> bool {
        self.lookup.contains(id)
    }

    /// Number of passing ids.
    pub fn len(&self) -> usize {
        self.passing.len()
    }

    /// Returns `true` if nothing passed.
    pub fn is_empty(&self) -> bool {
        self.passing.is_empty()
    }
}

/// The filter result and any warnings raised while compiling the model.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Rows that passed.
    pub result: FilterResult,
    /// Skipped model entries.
    pub warnings: Vec<GridWarning>,
}

struct ActiveItem {
    column: Arc<ColumnDef>,
    predicate: CellPredicate,
}

fn compile_items(model: &FilterModel, columns: &ColumnsState, warnings: &mut Vec<GridWarning>) -> Vec<ActiveItem> {
    let mut active = Vec::with_capacity(model.items.len());
    for item in &model.items {
        let Some(column) = columns.get(&item.field) else {
            tracing::warn!(target: targets::FILTER, field = %item.field, "filter item references unknown field");
            warnings.push(GridWarning::UnknownField {
                model: "filter",
                field: item.field.clone(),
            });
            continue;
        };
        let Some(operator) = column.filter_operator(&item.operator) else {
            tracing::warn!(
                target: targets::FILTER,
                field = %item.field,
                operator = %item.operator,
                "filter item references unknown operator"
            );
            warnings.push(GridWarning::UnknownOperator {
                field: item.field.clone(),
                operator: item.operator.clone(),
            });
            continue;
        };
        if let Some(predicate) = operator.predicate(item.value.as_ref()) {
            active.push(ActiveItem {
                column: column.clone(),
                predicate,
            });
        }
    }
    active
}

fn row_passes_items(items: &[ActiveItem], logic: LogicOperator, row: &Value) -> bool {
    if items.is_empty() {
        return true;
    }
    let test = |item: &ActiveItem| (item.predicate)(&item.column.value(row), row);
    match logic {
        LogicOperator::And => items.iter().all(test),
        LogicOperator::Or => items.iter().any(test),
    }
}

fn row_passes_quick_filter(
    needles: &[String],
    logic: LogicOperator,
    columns: &[Arc<ColumnDef>],
    row: &Value,
) -> bool {
    if needles.is_empty() {
        return true;
    }
    let haystack: Vec<String> = columns
        .iter()
        .map(|c| c.format(&c.value(row)).to_lowercase())
        .collect();
    let matches = |needle: &String| haystack.iter().any(|text| text.contains(needle.as_str()));
    match logic {
        LogicOperator::And => needles.iter().all(matches),
        LogicOperator::Or => needles.iter().any(matches),
    }
}

/// Evaluate `model` over `ids`.
///
/// Ids without a registered row (hydrated placeholders) always pass.
pub fn filter_rows(ids: &[RowId], rows: &RowsState, columns: &ColumnsState, model: &FilterModel) -> FilterOutcome {
    let mut warnings = Vec::new();
    let items = compile_items(model, columns, &mut warnings);
    let needles: Vec<String> = model
        .quick_filter_values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    if items.is_empty() && needles.is_empty() {
        return FilterOutcome {
            result: FilterResult::all(ids),
            warnings,
        };
    }

    let quick_columns: Vec<Arc<ColumnDef>> = if needles.is_empty() {
        Vec::new()
    } else {
        columns
            .visible()
            .columns
            .into_iter()
            .filter(|c| c.filterable)
            .collect()
    };

    let passing: Vec<RowId> = ids
        .iter()
        .filter(|id| match rows.get(id) {
            Some(row) => {
                row_passes_items(&items, model.logic_operator, row)
                    && row_passes_quick_filter(&needles, model.quick_filter_logic_operator, &quick_columns, row)
            }
            None => true,
        })
        .cloned()
        .collect();

    tracing::debug!(
        target: targets::FILTER,
        input = ids.len(),
        passing = passing.len(),
        active_items = items.len(),
        "filtered rows"
    );

    FilterOutcome {
        result: FilterResult {
            lookup: passing.iter().cloned().collect(),
            passing,
        },
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnDef, ColumnType};
    use crate::rows::default_row_id_getter;
    use serde_json::json;

    fn fixture() -> (RowsState, ColumnsState) {
        let rows = RowsState::from_rows(
            vec![
                json!({"id": 1, "age": 30, "name": "Alice"}),
                json!({"id": 2, "age": 25, "name": "Bob"}),
                json!({"id": 3, "age": 25, "name": "Carol"}),
            ],
            &default_row_id_getter(),
        )
        .unwrap();
        let columns = ColumnsState::new(vec![
            ColumnDef::new("age", ColumnType::Number),
            ColumnDef::new("name", ColumnType::String),
        ]);
        (rows, columns)
    }

    #[test]
    fn test_empty_model_is_identity() {
        let (rows, columns) = fixture();
        let outcome = filter_rows(rows.ids(), &rows, &columns, &FilterModel::default());
        assert_eq!(outcome.result.passing(), rows.ids().as_slice());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_greater_than() {
        let (rows, columns) = fixture();
        let model = FilterModel::new(vec![FilterItem::new("age", ">", json!(26))], LogicOperator::And);
        let outcome = filter_rows(rows.ids(), &rows, &columns, &model);
        assert_eq!(outcome.result.passing(), &[RowId::Int(1)]);
    }

    #[test]
    fn test_or_logic() {
        let (rows, columns) = fixture();
        let model = FilterModel::new(
            vec![
                FilterItem::new("age", ">", json!(26)),
                FilterItem::new("name", "equals", json!("bob")),
            ],
            LogicOperator::Or,
        );
        let outcome = filter_rows(rows.ids(), &rows, &columns, &model);
        assert_eq!(outcome.result.passing(), &[RowId::Int(1), RowId::Int(2)]);
    }

    #[test]
    fn test_unknown_field_and_operator_fail_open() {
        let (rows, columns) = fixture();
        let model = FilterModel::new(
            vec![
                FilterItem::new("missing", "=", json!(1)),
                FilterItem::new("age", "~=", json!(1)),
            ],
            LogicOperator::And,
        );
        let outcome = filter_rows(rows.ids(), &rows, &columns, &model);
        assert_eq!(outcome.result.len(), 3);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(matches!(outcome.warnings[0], GridWarning::UnknownField { .. }));
        assert!(matches!(outcome.warnings[1], GridWarning::UnknownOperator { .. }));
    }

    #[test]
    fn test_item_without_value_is_inactive() {
        let (rows, columns) = fixture();
        let model = FilterModel::new(
            vec![FilterItem {
                field: "age".into(),
                operator: ">".into(),
                value: None,
            }],
            LogicOperator::And,
        );
        assert_eq!(filter_rows(rows.ids(), &rows, &columns, &model).result.len(), 3);
    }

    #[test]
    fn test_quick_filter() {
        let (rows, columns) = fixture();
        let model = FilterModel {
            quick_filter_values: vec!["CAR".into()],
            ..FilterModel::default()
        };
        let outcome = filter_rows(rows.ids(), &rows, &columns, &model);
        assert_eq!(outcome.result.passing(), &[RowId::Int(3)]);

        let model = FilterModel {
            quick_filter_values: vec!["25".into(), "bob".into()],
            ..FilterModel::default()
        };
        let outcome = filter_rows(rows.ids(), &rows, &columns, &model);
        assert_eq!(outcome.result.passing(), &[RowId::Int(2)]);
    }

    #[test]
    fn test_model_serde() {
        let model: FilterModel = serde_json::from_value(json!({
            "items": [{"field": "age", "operator": ">", "value": 26}],
            "logicOperator": "or"
        }))
        .unwrap();
        assert_eq!(model.logic_operator, LogicOperator::Or);
        assert_eq!(model.items[0].value, Some(json!(26)));
    }
}
