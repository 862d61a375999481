//! Column definitions, column state and column dimensions.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterOperator;
use crate::filter::operators::default_operators;
use crate::value::CellValue;

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    /// Free text.
    #[default]
    String,
    /// Numeric.
    Number,
    /// Calendar date.
    Date,
    /// Date and time.
    DateTime,
    /// Boolean.
    Boolean,
    /// One value out of `value_options`.
    SingleSelect,
    /// Several values out of `value_options`.
    MultiSelect,
    /// Host-defined; values are taken as-is.
    Custom,
}

/// Reads a cell value out of a row.
pub type ValueGetter = Arc<dyn Fn(&Value) -> CellValue + Send + Sync>;
/// Formats a cell value for display and quick filtering.
pub type ValueFormatter = Arc<dyn Fn(&CellValue) -> String + Send + Sync>;
/// Compares two cell values in ascending order.
pub type SortComparator = Arc<dyn Fn(&CellValue, &CellValue) -> Ordering + Send + Sync>;

/// A column definition. Immutable once registered.
#[derive(Clone)]
pub struct ColumnDef {
    /// Row field this column reads.
    pub field: String,
    /// Header text.
    pub header_name: Option<String>,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Fixed width in pixels (ignored when `flex` is set).
    pub width: f64,
    /// Lower width bound.
    pub min_width: f64,
    /// Upper width bound.
    pub max_width: f64,
    /// Share of the free width.
    pub flex: Option<f64>,
    /// Whether the column can be sorted.
    pub sortable: bool,
    /// Whether the column can be filtered.
    pub filterable: bool,
    /// Whether the column can be grouped by.
    pub groupable: bool,
    /// Whether the column can be aggregated.
    pub aggregable: bool,
    /// Allowed values for select types.
    pub value_options: Vec<CellValue>,
    /// Aggregations allowed on this column; `None` allows all compatible ones.
    pub available_aggregations: Option<Vec<String>>,
    value_getter: Option<ValueGetter>,
    value_formatter: Option<ValueFormatter>,
    sort_comparator: Option<SortComparator>,
    filter_operators: Vec<FilterOperator>,
}

impl ColumnDef {
    /// Create a column with defaults for its type.
    pub fn new(field: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            field: field.into(),
            header_name: None,
            column_type,
            width: 100.0,
            min_width: 50.0,
            max_width: f64::INFINITY,
            flex: None,
            sortable: true,
            filterable: true,
            groupable: true,
            aggregable: true,
            value_options: Vec::new(),
            available_aggregations: None,
            value_getter: None,
            value_formatter: None,
            sort_comparator: None,
            filter_operators: default_operators(column_type),
        }
    }

    /// Set the header text.
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }

    /// Set a fixed width.
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    /// Set width bounds.
    pub fn with_width_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_width = min;
        self.max_width = max;
        self
    }

    /// Make the column flexible.
    pub fn with_flex(mut self, flex: f64) -> Self {
        self.flex = Some(flex);
        self
    }

    /// Enable or disable sorting.
    pub fn with_sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    /// Enable or disable filtering.
    pub fn with_filterable(mut self, filterable: bool) -> Self {
        self.filterable = filterable;
        self
    }

    /// Enable or disable grouping.
    pub fn with_groupable(mut self, groupable: bool) -> Self {
        self.groupable = groupable;
        self
    }

    /// Enable or disable aggregation.
    pub fn with_aggregable(mut self, aggregable: bool) -> Self {
        self.aggregable = aggregable;
        self
    }

    /// Set allowed values for select types.
    pub fn with_value_options(mut self, options: Vec<CellValue>) -> Self {
        self.value_options = options;
        self
    }

    /// Restrict the aggregations allowed on this column.
    pub fn with_available_aggregations(mut self, names: Vec<String>) -> Self {
        self.available_aggregations = Some(names);
        self
    }

    /// Read values through a custom getter instead of `row[field]`.
    pub fn with_value_getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Value) -> CellValue + Send + Sync + 'static,
    {
        self.value_getter = Some(Arc::new(getter));
        self
    }

    /// Format values through a custom formatter.
    pub fn with_value_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&CellValue) -> String + Send + Sync + 'static,
    {
        self.value_formatter = Some(Arc::new(formatter));
        self
    }

    /// Compare values with a custom comparator (ascending order).
    pub fn with_sort_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&CellValue, &CellValue) -> Ordering + Send + Sync + 'static,
    {
        self.sort_comparator = Some(Arc::new(comparator));
        self
    }

    /// Replace the filter operators.
    pub fn with_filter_operators(mut self, operators: Vec<FilterOperator>) -> Self {
        self.filter_operators = operators;
        self
    }

    /// The cell value of this column in `row`.
    pub fn value(&self, row: &Value) -> CellValue {
        match &self.value_getter {
            Some(getter) => getter(row),
            None => row
                .get(&self.field)
                .map_or(CellValue::Null, |raw| CellValue::coerce(raw, self.column_type)),
        }
    }

    /// Display text of a value.
    pub fn format(&self, value: &CellValue) -> String {
        match &self.value_formatter {
            Some(formatter) => formatter(value),
            None => value.to_display_string(),
        }
    }

    /// The custom comparator, if any.
    pub fn sort_comparator(&self) -> Option<&SortComparator> {
        self.sort_comparator.as_ref()
    }

    /// Available filter operators.
    pub fn filter_operators(&self) -> &[FilterOperator] {
        &self.filter_operators
    }

    /// Look up a filter operator by value.
    pub fn filter_operator(&self, value: &str) -> Option<&FilterOperator> {
        self.filter_operators.iter().find(|op| op.value == value)
    }
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("field", &self.field)
            .field("column_type", &self.column_type)
            .field("width", &self.width)
            .field("flex", &self.flex)
            .field("custom_getter", &self.value_getter.is_some())
            .field("custom_comparator", &self.sort_comparator.is_some())
            .field("filter_operators", &self.filter_operators.len())
            .finish_non_exhaustive()
    }
}

/// Field → visible. Columns without an entry are visible.
pub type ColumnVisibilityModel = HashMap<String, bool>;

/// Fields pinned to either edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinnedColumns {
    /// Pinned to the left edge, in order.
    pub left: Vec<String>,
    /// Pinned to the right edge, in order.
    pub right: Vec<String>,
}

/// The registered columns plus visibility and pinning.
#[derive(Debug, Clone, Default)]
pub struct ColumnsState {
    order: Vec<String>,
    lookup: HashMap<String, Arc<ColumnDef>>,
    /// Per-field visibility overrides.
    pub visibility: ColumnVisibilityModel,
    /// Pinned fields.
    pub pinned: PinnedColumns,
}

impl ColumnsState {
    /// Build from column definitions. Later duplicates of a field replace earlier ones.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let mut order = Vec::with_capacity(columns.len());
        let mut lookup = HashMap::with_capacity(columns.len());
        for column in columns {
            if !lookup.contains_key(&column.field) {
                order.push(column.field.clone());
            }
            lookup.insert(column.field.clone(), Arc::new(column));
        }
        Self {
            order,
            lookup,
            visibility: HashMap::new(),
            pinned: PinnedColumns::default(),
        }
    }

    /// Copy with new visibility overrides.
    pub fn with_visibility(&self, visibility: ColumnVisibilityModel) -> Self {
        Self {
            visibility,
            ..self.clone()
        }
    }

    /// Copy with new pinning.
    pub fn with_pinned(&self, pinned: PinnedColumns) -> Self {
        Self {
            pinned,
            ..self.clone()
        }
    }

    /// Look up a column.
    pub fn get(&self, field: &str) -> Option<&Arc<ColumnDef>> {
        self.lookup.get(field)
    }

    /// Number of registered columns.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no columns are registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All columns in declared order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<ColumnDef>> {
        self.order.iter().filter_map(|field| self.lookup.get(field))
    }

    /// Whether a column is visible.
    pub fn is_visible(&self, field: &str) -> bool {
        self.lookup.contains_key(field) && self.visibility.get(field).copied().unwrap_or(true)
    }

    /// Visible columns: pinned-left, unpinned in declared order, pinned-right.
    pub fn visible(&self) -> VisibleColumns {
        let left: Vec<Arc<ColumnDef>> = self.pinned_side(&self.pinned.left);
        let right: Vec<Arc<ColumnDef>> = self.pinned_side(&self.pinned.right);
        let pinned: HashSet<&str> = left
            .iter()
            .chain(right.iter())
            .map(|c| c.field.as_str())
            .collect();

        let mut columns = left.clone();
        columns.extend(
            self.all()
                .filter(|c| !pinned.contains(c.field.as_str()) && self.is_visible(&c.field))
                .cloned(),
        );
        columns.extend(right.iter().cloned());

        VisibleColumns {
            pinned_left: left.len(),
            pinned_right: right.len(),
            columns,
        }
    }

    fn pinned_side(&self, fields: &[String]) -> Vec<Arc<ColumnDef>> {
        let mut seen = HashSet::new();
        fields
            .iter()
            .filter(|f| self.is_visible(f) && seen.insert(f.as_str()))
            .filter_map(|f| self.lookup.get(f).cloned())
            .collect()
    }
}

/// Visible columns in render order.
#[derive(Debug, Clone, Default)]
pub struct VisibleColumns {
    /// Columns in render order.
    pub columns: Vec<Arc<ColumnDef>>,
    /// Number of leading columns pinned left.
    pub pinned_left: usize,
    /// Number of trailing columns pinned right.
    pub pinned_right: usize,
}

/// Computed widths and offsets of the visible columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnLayout {
    /// Visible fields in render order.
    pub fields: Vec<String>,
    /// Computed width per visible column.
    pub widths: Vec<f64>,
    /// Left offset per visible column, cumulative over `widths`.
    pub offsets: Vec<f64>,
    /// Sum of all widths.
    pub total_width: f64,
    /// Number of leading columns pinned left.
    pub pinned_left: usize,
    /// Number of trailing columns pinned right.
    pub pinned_right: usize,
}

impl ColumnLayout {
    /// Lay out `visible` into `available_width` pixels.
    pub fn compute(visible: &VisibleColumns, available_width: f64) -> Self {
        let widths = compute_column_widths(&visible.columns, available_width);
        let mut offsets = Vec::with_capacity(widths.len());
        let mut acc = 0.0;
        for width in &widths {
            offsets.push(acc);
            acc += width;
        }
        Self {
            fields: visible.columns.iter().map(|c| c.field.clone()).collect(),
            widths,
            offsets,
            total_width: acc,
            pinned_left: visible.pinned_left,
            pinned_right: visible.pinned_right,
        }
    }

    /// Number of visible columns.
    pub fn len(&self) -> usize {
        self.widths.len()
    }

    /// Returns `true` if no columns are visible.
    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    /// Combined width of the pinned-left columns.
    pub fn pinned_left_width(&self) -> f64 {
        self.widths[..self.pinned_left].iter().sum()
    }

    /// Combined width of the pinned-right columns.
    pub fn pinned_right_width(&self) -> f64 {
        self.widths[self.widths.len() - self.pinned_right..].iter().sum()
    }
}

/// Compute column widths.
///
/// Columns without `flex` keep their clamped width. The width left over is
/// shared among flex columns in proportion to their flex factor. A column
/// whose share violates its bounds is frozen at the bound and the remaining
/// space is redistributed among the others until no violation remains.
pub fn compute_column_widths(columns: &[Arc<ColumnDef>], available_width: f64) -> Vec<f64> {
    let clamp = |c: &ColumnDef, w: f64| w.max(c.min_width).min(c.max_width.max(c.min_width));

    let mut widths: Vec<f64> = columns
        .iter()
        .map(|c| if c.flex.is_some() { 0.0 } else { clamp(c, c.width) })
        .collect();

    let fixed: f64 = columns
        .iter()
        .zip(&widths)
        .filter(|(c, _)| c.flex.is_none())
        .map(|(_, w)| *w)
        .sum();

    let mut unfrozen: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.flex.is_some_and(|f| f > 0.0))
        .map(|(i, _)| i)
        .collect();
    let mut free = (available_width - fixed).max(0.0);

    // Zero or negative flex behaves as a fixed column at min width.
    for (i, c) in columns.iter().enumerate() {
        if c.flex.is_some_and(|f| f <= 0.0) {
            widths[i] = c.min_width;
            free = (free - c.min_width).max(0.0);
        }
    }

    while !unfrozen.is_empty() {
        let total_flex: f64 = unfrozen
            .iter()
            .filter_map(|&i| columns[i].flex)
            .sum();
        let mut violators = Vec::new();
        for &i in &unfrozen {
            let column = &columns[i];
            let share = free * column.flex.unwrap_or(0.0) / total_flex;
            let clamped = clamp(column, share);
            widths[i] = share;
            if clamped != share {
                violators.push((i, clamped));
            }
        }
        if violators.is_empty() {
            break;
        }
        for (i, clamped) in violators {
            widths[i] = clamped;
            free = (free - clamped).max(0.0);
            unfrozen.retain(|&u| u != i);
        }
    }

    widths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(defs: Vec<ColumnDef>) -> Vec<Arc<ColumnDef>> {
        defs.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_value_reads_and_coerces() {
        let column = ColumnDef::new("age", ColumnType::Number);
        let row = serde_json::json!({"age": "31"});
        assert_eq!(column.value(&row), CellValue::Number(31.0));
        assert_eq!(column.value(&serde_json::json!({})), CellValue::Null);
    }

    #[test]
    fn test_custom_getter_and_formatter() {
        let column = ColumnDef::new("full", ColumnType::String)
            .with_value_getter(|row| {
                let first = row["first"].as_str().unwrap_or_default();
                let last = row["last"].as_str().unwrap_or_default();
                CellValue::String(format!("{first} {last}"))
            })
            .with_value_formatter(|v| v.to_display_string().to_uppercase());
        let row = serde_json::json!({"first": "Ada", "last": "Lovelace"});
        let value = column.value(&row);
        assert_eq!(column.format(&value), "ADA LOVELACE");
    }

    #[test]
    fn test_visible_order_with_pinning() {
        let state = ColumnsState::new(vec![
            ColumnDef::new("a", ColumnType::String),
            ColumnDef::new("b", ColumnType::String),
            ColumnDef::new("c", ColumnType::String),
            ColumnDef::new("d", ColumnType::String),
        ])
        .with_pinned(PinnedColumns {
            left: vec!["c".into()],
            right: vec!["a".into()],
        })
        .with_visibility(HashMap::from([("b".to_string(), false)]));

        let visible = state.visible();
        let fields: Vec<_> = visible.columns.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["c", "d", "a"]);
        assert_eq!(visible.pinned_left, 1);
        assert_eq!(visible.pinned_right, 1);
    }

    #[test]
    fn test_flex_distribution() {
        let columns = cols(vec![
            ColumnDef::new("fixed", ColumnType::String).with_width(100.0),
            ColumnDef::new("one", ColumnType::String).with_flex(1.0),
            ColumnDef::new("two", ColumnType::String).with_flex(2.0),
        ]);
        let widths = compute_column_widths(&columns, 400.0);
        assert_eq!(widths, vec![100.0, 100.0, 200.0]);
    }

    #[test]
    fn test_flex_respects_bounds() {
        let columns = cols(vec![
            ColumnDef::new("capped", ColumnType::String)
                .with_flex(1.0)
                .with_width_bounds(50.0, 80.0),
            ColumnDef::new("free", ColumnType::String).with_flex(1.0),
        ]);
        let widths = compute_column_widths(&columns, 300.0);
        assert_eq!(widths, vec![80.0, 220.0]);
    }

    #[test]
    fn test_flex_min_width_when_no_space() {
        let columns = cols(vec![
            ColumnDef::new("fixed", ColumnType::String).with_width(500.0),
            ColumnDef::new("flex", ColumnType::String).with_flex(1.0),
        ]);
        let widths = compute_column_widths(&columns, 300.0);
        assert_eq!(widths, vec![500.0, 50.0]);
    }

    #[test]
    fn test_layout_offsets() {
        let state = ColumnsState::new(vec![
            ColumnDef::new("a", ColumnType::String).with_width(60.0),
            ColumnDef::new("b", ColumnType::String).with_width(70.0),
        ]);
        let layout = ColumnLayout::compute(&state.visible(), 1000.0);
        assert_eq!(layout.offsets, vec![0.0, 60.0]);
        assert_eq!(layout.total_width, 130.0);
        assert_eq!(layout.pinned_left_width(), 0.0);
    }
}
