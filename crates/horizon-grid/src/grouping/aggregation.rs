//! Aggregation of leaf values per group node.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::GroupMembership;
use crate::column::{ColumnDef, ColumnType, ColumnsState};
use crate::error::GridWarning;
use crate::logging::targets;
use crate::rows::RowsState;
use crate::tree::{RowNodeKind, RowTree};
use crate::value::{CellValue, RowId};

/// Column field → aggregation function name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationModel(pub BTreeMap<String, String>);

impl AggregationModel {
    /// Create a model from `(field, function)` pairs.
    pub fn new<F: Into<String>, N: Into<String>>(entries: impl IntoIterator<Item = (F, N)>) -> Self {
        Self(entries.into_iter().map(|(f, n)| (f.into(), n.into())).collect())
    }

    /// Returns `true` if nothing is aggregated.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type AggregateFn = Arc<dyn Fn(&[CellValue]) -> CellValue + Send + Sync>;

/// A named aggregation over the values of a group's leaves.
#[derive(Clone)]
pub struct AggregationFunction {
    /// Name referenced by the aggregation model.
    pub name: String,
    apply: AggregateFn,
    column_types: Option<Vec<ColumnType>>,
}

impl AggregationFunction {
    /// A function applicable to every column type.
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&[CellValue]) -> CellValue + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
            column_types: None,
        }
    }

    /// Restrict the function to some column types.
    pub fn with_column_types(mut self, types: Vec<ColumnType>) -> Self {
        self.column_types = Some(types);
        self
    }

    /// Whether the function can aggregate columns of this type.
    pub fn supports(&self, column_type: ColumnType) -> bool {
        self.column_types
            .as_ref()
            .is_none_or(|types| types.contains(&column_type))
    }

    /// Aggregate `values`.
    pub fn apply(&self, values: &[CellValue]) -> CellValue {
        (self.apply)(values)
    }
}

impl fmt::Debug for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationFunction")
            .field("name", &self.name)
            .field("column_types", &self.column_types)
            .finish_non_exhaustive()
    }
}

fn numbers(values: &[CellValue]) -> impl Iterator<Item = f64> + '_ {
    values.iter().filter_map(|v| match v {
        CellValue::Number(n) if !n.is_nan() => Some(*n),
        _ => None,
    })
}

fn extreme(values: &[CellValue], pick_greater: bool) -> CellValue {
    values
        .iter()
        .filter(|v| matches!(v, CellValue::Number(n) if !n.is_nan()) || matches!(v, CellValue::Date(_)))
        .fold(None::<&CellValue>, |best, v| match best {
            None => Some(v),
            Some(b) => {
                let greater = v.as_f64() > b.as_f64();
                Some(if greater == pick_greater { v } else { b })
            }
        })
        .cloned()
        .unwrap_or(CellValue::Null)
}

fn builtins() -> Vec<AggregationFunction> {
    let numeric = vec![ColumnType::Number];
    let ordered = vec![ColumnType::Number, ColumnType::Date, ColumnType::DateTime];
    vec![
        AggregationFunction::new("sum", |values| CellValue::Number(numbers(values).sum()))
            .with_column_types(numeric.clone()),
        AggregationFunction::new("avg", |values| {
            let (total, count) = numbers(values).fold((0.0, 0usize), |(t, c), n| (t + n, c + 1));
            if count == 0 {
                CellValue::Null
            } else {
                CellValue::Number(total / count as f64)
            }
        })
        .with_column_types(numeric),
        AggregationFunction::new("min", |values| extreme(values, false)).with_column_types(ordered.clone()),
        AggregationFunction::new("max", |values| extreme(values, true)).with_column_types(ordered),
        AggregationFunction::new("size", |values| CellValue::Number(values.len() as f64)),
    ]
}

/// Registered aggregation functions.
#[derive(Debug, Clone)]
pub struct AggregationRegistry {
    functions: HashMap<String, AggregationFunction>,
}

impl Default for AggregationRegistry {
    fn default() -> Self {
        Self {
            functions: builtins().into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }
}

impl AggregationRegistry {
    /// Copy with `function` added or replaced.
    pub fn with(&self, function: AggregationFunction) -> Self {
        let mut functions = self.functions.clone();
        functions.insert(function.name.clone(), function);
        Self { functions }
    }

    /// Look up a function. `count` is an alias of `size`.
    pub fn get(&self, name: &str) -> Option<&AggregationFunction> {
        self.functions
            .get(name)
            .or_else(|| (name == "count").then(|| self.functions.get("size")).flatten())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Aggregated values per node id and field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationLookup {
    values: HashMap<RowId, HashMap<String, CellValue>>,
}

impl AggregationLookup {
    /// The aggregate of `field` for a group (or its footer).
    pub fn get(&self, id: &RowId, field: &str) -> Option<&CellValue> {
        self.values.get(id).and_then(|fields| fields.get(field))
    }

    /// All aggregates of a node.
    pub fn for_node(&self, id: &RowId) -> Option<&HashMap<String, CellValue>> {
        self.values.get(id)
    }

    /// Returns `true` if nothing was aggregated.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct Rule<'a> {
    column: Arc<ColumnDef>,
    function: &'a AggregationFunction,
}

fn compile_rules<'a>(
    model: &AggregationModel,
    columns: &ColumnsState,
    registry: &'a AggregationRegistry,
    warnings: &mut Vec<GridWarning>,
) -> Vec<Rule<'a>> {
    let mut rules = Vec::new();
    for (field, name) in &model.0 {
        let Some(column) = columns.get(field) else {
            tracing::warn!(target: targets::GROUPING, field = %field, "aggregation model references unknown field");
            warnings.push(GridWarning::UnknownField {
                model: "aggregation",
                field: field.clone(),
            });
            continue;
        };
        let Some(function) = registry.get(name) else {
            tracing::warn!(target: targets::GROUPING, field = %field, function = %name, "aggregation function not registered");
            warnings.push(GridWarning::MissingAggregation {
                field: field.clone(),
                function: name.clone(),
            });
            continue;
        };
        let allowed = column
            .available_aggregations
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name || n == &function.name));
        if !column.aggregable || !allowed || !function.supports(column.column_type) {
            tracing::warn!(target: targets::GROUPING, field = %field, function = %name, "aggregation not applicable to column");
            warnings.push(GridWarning::UnsupportedAggregation {
                field: field.clone(),
                function: name.clone(),
            });
            continue;
        }
        rules.push(Rule {
            column: column.clone(),
            function,
        });
    }
    rules
}

/// Compute aggregates for every group node and the root.
///
/// With `membership`, groups aggregate over all their rows (filtered or not);
/// otherwise over the leaves present in `tree`.
pub fn aggregate_tree(
    tree: &RowTree,
    rows: &RowsState,
    columns: &ColumnsState,
    model: &AggregationModel,
    registry: &AggregationRegistry,
    membership: Option<&GroupMembership>,
) -> (AggregationLookup, Vec<GridWarning>) {
    let mut warnings = Vec::new();
    let rules = compile_rules(model, columns, registry, &mut warnings);
    if rules.is_empty() {
        return (AggregationLookup::default(), warnings);
    }

    let mut values = HashMap::new();
    let groups = std::iter::once(tree.root()).chain(
        tree.nodes()
            .filter(|n| n.kind == RowNodeKind::Group && !n.id.is_root()),
    );
    for group in groups {
        let leaves = match membership.and_then(|m| m.get(&group.id)) {
            Some(all) => all.clone(),
            None if membership.is_some() => Vec::new(),
            None => tree.leaves_under(&group.id),
        };
        let mut fields = HashMap::with_capacity(rules.len());
        for rule in &rules {
            let cells: Vec<CellValue> = leaves
                .iter()
                .filter_map(|id| rows.get(id))
                .map(|row| rule.column.value(row))
                .collect();
            fields.insert(rule.column.field.clone(), rule.function.apply(&cells));
        }
        if let Some(footer) = &group.footer_id {
            values.insert(footer.clone(), fields.clone());
        }
        values.insert(group.id.clone(), fields);
    }

    tracing::debug!(target: targets::GROUPING, groups = values.len(), rules = rules.len(), "aggregated groups");
    (AggregationLookup { values }, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::filter::FilterResult;
    use crate::grouping::{GroupingInput, GroupingModel, build_row_tree};
    use crate::rows::default_row_id_getter;
    use serde_json::json;

    fn setup() -> (RowsState, ColumnsState) {
        let rows = RowsState::from_rows(
            vec![
                json!({"id": 1, "company": "A", "salary": 10, "joined": "2020-01-01"}),
                json!({"id": 2, "company": "A", "salary": 30, "joined": "2021-06-01"}),
                json!({"id": 3, "company": "B", "salary": null, "joined": "2019-03-01"}),
            ],
            &default_row_id_getter(),
        )
        .unwrap();
        let columns = ColumnsState::new(vec![
            ColumnDef::new("company", ColumnType::String),
            ColumnDef::new("salary", ColumnType::Number),
            ColumnDef::new("joined", ColumnType::Date),
        ]);
        (rows, columns)
    }

    fn grouped_tree(rows: &RowsState, columns: &ColumnsState) -> RowTree {
        let config = GridConfig::default();
        let filter = FilterResult::all(rows.ids());
        let input = GroupingInput {
            rows,
            columns,
            candidates: rows.ids(),
            filter: &filter,
            config: &config,
        };
        build_row_tree(&input, &GroupingModel::new(["company"]), None).tree
    }

    #[test]
    fn test_builtin_aggregations() {
        let (rows, columns) = setup();
        let tree = grouped_tree(&rows, &columns);
        let model = AggregationModel::new([("salary", "sum")]);
        let (lookup, warnings) =
            aggregate_tree(&tree, &rows, &columns, &model, &AggregationRegistry::default(), None);
        assert!(warnings.is_empty());

        let a = RowId::from("auto-generated-row-company/A");
        assert_eq!(lookup.get(&a, "salary"), Some(&CellValue::Number(40.0)));
        assert_eq!(lookup.get(&RowId::root(), "salary"), Some(&CellValue::Number(40.0)));

        let model = AggregationModel::new([("salary", "avg"), ("joined", "max")]);
        let (lookup, _) = aggregate_tree(&tree, &rows, &columns, &model, &AggregationRegistry::default(), None);
        assert_eq!(lookup.get(&a, "salary"), Some(&CellValue::Number(20.0)));
        let b = RowId::from("auto-generated-row-company/B");
        assert_eq!(lookup.get(&b, "salary"), Some(&CellValue::Null));
        assert_eq!(
            lookup.get(&a, "joined"),
            Some(&CellValue::coerce(&json!("2021-06-01"), ColumnType::Date))
        );
    }

    #[test]
    fn test_count_sums_over_children() {
        let (rows, columns) = setup();
        let tree = grouped_tree(&rows, &columns);
        let model = AggregationModel::new([("company", "count")]);
        let (lookup, _) = aggregate_tree(&tree, &rows, &columns, &model, &AggregationRegistry::default(), None);

        let root_count = lookup.get(&RowId::root(), "company").and_then(CellValue::as_f64);
        let children_total: f64 = tree
            .top_level()
            .iter()
            .filter_map(|id| lookup.get(id, "company").and_then(CellValue::as_f64))
            .sum();
        assert_eq!(root_count, Some(3.0));
        assert_eq!(children_total, 3.0);
    }

    #[test]
    fn test_invalid_rules_warn() {
        let (rows, columns) = setup();
        let tree = grouped_tree(&rows, &columns);
        let model = AggregationModel::new([("nope", "sum"), ("salary", "median"), ("company", "sum")]);
        let (lookup, warnings) =
            aggregate_tree(&tree, &rows, &columns, &model, &AggregationRegistry::default(), None);
        assert!(lookup.is_empty());
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| matches!(w, GridWarning::MissingAggregation { .. })));
        assert!(warnings.iter().any(|w| matches!(w, GridWarning::UnsupportedAggregation { .. })));
    }

    #[test]
    fn test_custom_function() {
        let (rows, columns) = setup();
        let tree = grouped_tree(&rows, &columns);
        let registry = AggregationRegistry::default().with(AggregationFunction::new("firstCompany", |values| {
            values.first().cloned().unwrap_or_default()
        }));
        let model = AggregationModel::new([("company", "firstCompany")]);
        let (lookup, _) = aggregate_tree(&tree, &rows, &columns, &model, &registry, None);
        assert_eq!(
            lookup.get(&RowId::root(), "company"),
            Some(&CellValue::String("A".into()))
        );
        assert!(registry.names().contains(&"firstCompany"));
    }
}
