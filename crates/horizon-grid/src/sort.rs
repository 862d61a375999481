//! Sort engine.
//!
//! Multi-key sorting with an explicit index tie-breaker, so equal rows keep
//! their input order without relying on the stability of the sort routine.
//! Empty values go to the configured end regardless of direction.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::column::{ColumnDef, ColumnsState};
use crate::config::NullsPosition;
use crate::error::GridWarning;
use crate::logging::targets;
use crate::rows::RowsState;
use crate::tree::{RowNodeKind, RowTree};
use crate::value::{CellValue, RowId, compare_text};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// One sort entry. A `None` direction removes the field from sorting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortItem {
    /// Column field.
    pub field: String,
    /// Direction.
    #[serde(alias = "sort")]
    pub direction: Option<SortDirection>,
}

impl SortItem {
    /// Ascending entry.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Some(SortDirection::Asc),
        }
    }

    /// Descending entry.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Some(SortDirection::Desc),
        }
    }
}

/// Sort entries in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortModel(pub Vec<SortItem>);

impl SortModel {
    /// Create a model.
    pub fn new(items: Vec<SortItem>) -> Self {
        Self(items)
    }

    /// Entries that have a direction.
    pub fn active(&self) -> impl Iterator<Item = (&str, SortDirection)> {
        self.0
            .iter()
            .filter_map(|item| item.direction.map(|d| (item.field.as_str(), d)))
    }

    /// Returns `true` if no entry has a direction.
    pub fn is_empty(&self) -> bool {
        self.active().next().is_none()
    }
}

/// Ascending comparison of two non-empty values.
pub fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::String(x), CellValue::String(y)) => compare_text(x, y),
        (CellValue::Date(x), CellValue::Date(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        _ => compare_text(&a.to_display_string(), &b.to_display_string()),
    }
}

struct SortKey {
    column: Arc<ColumnDef>,
    direction: SortDirection,
}

impl SortKey {
    fn compare(&self, a: &CellValue, b: &CellValue, nulls: NullsPosition) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match nulls {
                NullsPosition::First => Ordering::Less,
                NullsPosition::Last => Ordering::Greater,
            },
            (false, true) => match nulls {
                NullsPosition::First => Ordering::Greater,
                NullsPosition::Last => Ordering::Less,
            },
            (false, false) => {
                let ordering = match self.column.sort_comparator() {
                    Some(comparator) => comparator(a, b),
                    None => compare_cells(a, b),
                };
                match self.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        }
    }
}

/// A sort model compiled against the column model.
pub struct RowComparator {
    keys: Vec<SortKey>,
    nulls: NullsPosition,
}

impl RowComparator {
    /// Compile `model`. Unknown fields are skipped with a warning.
    pub fn new(model: &SortModel, columns: &ColumnsState, nulls: NullsPosition) -> (Self, Vec<GridWarning>) {
        let mut warnings = Vec::new();
        let mut keys = Vec::new();
        for (field, direction) in model.active() {
            match columns.get(field) {
                Some(column) => keys.push(SortKey {
                    column: column.clone(),
                    direction,
                }),
                None => {
                    tracing::warn!(target: targets::SORT, field, "sort model references unknown field");
                    warnings.push(GridWarning::UnknownField {
                        model: "sort",
                        field: field.to_string(),
                    });
                }
            }
        }
        (Self { keys, nulls }, warnings)
    }

    /// Returns `true` if there is nothing to sort by.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The sort values of a row, one per key.
    fn values(&self, rows: &RowsState, id: &RowId) -> Vec<CellValue> {
        match rows.get(id) {
            Some(row) => self.keys.iter().map(|k| k.column.value(row)).collect(),
            None => vec![CellValue::Null; self.keys.len()],
        }
    }

    fn compare(&self, a: &[CellValue], b: &[CellValue]) -> Ordering {
        self.keys
            .iter()
            .zip(a.iter().zip(b))
            .map(|(key, (x, y))| key.compare(x, y, self.nulls))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Sort row ids by their row values.
    pub fn sort_ids(&self, ids: &[RowId], rows: &RowsState) -> Vec<RowId> {
        let mut keyed: Vec<(usize, Vec<CellValue>)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (i, self.values(rows, id)))
            .collect();
        keyed.sort_unstable_by(|(ia, va), (ib, vb)| self.compare(va, vb).then(ia.cmp(ib)));
        keyed.into_iter().map(|(i, _)| ids[i].clone()).collect()
    }

    /// Sort group ids by their grouping key, using the key whose field is the
    /// grouping field. Without such a key the input order is kept.
    fn sort_groups(&self, ids: &[RowId], tree: &RowTree, field: &str) -> Vec<RowId> {
        let Some(key) = self.keys.iter().find(|k| k.column.field == field) else {
            return ids.to_vec();
        };
        let mut keyed: Vec<(usize, CellValue)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let value = tree
                    .get(id)
                    .and_then(|n| n.grouping_key.clone())
                    .unwrap_or_default();
                (i, value)
            })
            .collect();
        keyed.sort_unstable_by(|(ia, va), (ib, vb)| key.compare(va, vb, self.nulls).then(ia.cmp(ib)));
        keyed.into_iter().map(|(i, _)| ids[i].clone()).collect()
    }

    /// Reorder the children of every node. Footers stay last.
    ///
    /// Returns `None` when there is nothing to sort by.
    pub fn sort_tree(&self, tree: &RowTree, rows: &RowsState) -> Option<RowTree> {
        if self.is_empty() {
            return None;
        }
        let mut sorted = tree.clone();
        let parents: Vec<RowId> = std::iter::once(RowId::root())
            .chain(tree.pre_order())
            .filter(|id| tree.children(id).len() > 1)
            .collect();

        for parent in parents {
            let (footers, children): (Vec<RowId>, Vec<RowId>) = tree
                .children(&parent)
                .iter()
                .cloned()
                .partition(|id| tree.get(id).is_some_and(|n| n.kind == RowNodeKind::Footer));

            let group_field = children
                .first()
                .and_then(|id| tree.get(id))
                .filter(|n| n.is_auto_generated && n.kind == RowNodeKind::Group)
                .and_then(|n| n.grouping_field.clone());

            let mut ordered = match group_field {
                Some(field) => self.sort_groups(&children, tree, &field),
                None => self.sort_ids(&children, rows),
            };
            ordered.extend(footers);
            sorted.set_children(&parent, ordered);
        }

        tracing::debug!(target: targets::SORT, keys = self.keys.len(), nodes = tree.len(), "sorted row tree");
        Some(sorted)
    }
}
