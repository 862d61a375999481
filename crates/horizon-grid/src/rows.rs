//! The row registry: the master row collection keyed by row id.
//!
//! A [`RowsState`] is an immutable value. Every change produces a new
//! `RowsState`, and individual rows are shared `Arc`s that are replaced, never
//! mutated, so stages can compare rows by reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{DataSourceError, GridError, Result};
use crate::value::RowId;

/// A row as supplied by the host.
pub type GridRowModel = Arc<Value>;

/// Extracts the id of a row.
pub type RowIdGetter = Arc<dyn Fn(&Value) -> Option<RowId> + Send + Sync>;

/// The default id getter: reads `row["id"]`.
pub fn default_row_id_getter() -> RowIdGetter {
    Arc::new(|row: &Value| row.get("id").and_then(RowId::from_json))
}

/// One incremental row change.
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdate {
    /// Insert a row, or merge its fields into the existing row with the same id.
    Upsert(Value),
    /// Remove a row.
    Delete(RowId),
}

impl RowUpdate {
    /// Interpret a raw update: objects carrying `"_action": "delete"` delete,
    /// everything else upserts.
    pub fn from_json(value: Value, get_id: &RowIdGetter) -> Result<Self> {
        if value.get("_action").and_then(Value::as_str) == Some("delete") {
            let id = get_id(&value).ok_or(GridError::MissingRowId { index: 0 })?;
            return Ok(Self::Delete(id));
        }
        Ok(Self::Upsert(value))
    }
}

/// The master row collection.
#[derive(Clone, Default)]
pub struct RowsState {
    ids: Arc<Vec<RowId>>,
    lookup: Arc<HashMap<RowId, GridRowModel>>,
    /// Total rows available on the server, when known.
    pub total_row_count: Option<usize>,
    /// A fetch is in progress.
    pub loading: bool,
    /// The last fetch failed.
    pub error: Option<DataSourceError>,
    /// Cursor-based paging: whether more rows exist.
    pub has_next_page: Option<bool>,
    /// Cursor-based paging: cursor for the next request.
    pub next_cursor: Option<String>,
}

impl RowsState {
    /// Build from a full row set. Fails on missing or duplicate ids.
    pub fn from_rows(rows: Vec<Value>, get_id: &RowIdGetter) -> Result<Self> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut lookup = HashMap::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let id = get_id(&row).ok_or(GridError::MissingRowId { index })?;
            if lookup.contains_key(&id) {
                return Err(GridError::DuplicateRowId(id));
            }
            ids.push(id.clone());
            lookup.insert(id, Arc::new(row));
        }
        Ok(Self {
            ids: Arc::new(ids),
            lookup: Arc::new(lookup),
            ..Self::default()
        })
    }

    /// Apply incremental updates. Upserts of unknown ids append.
    pub fn with_updates(&self, updates: Vec<RowUpdate>, get_id: &RowIdGetter) -> Result<Self> {
        let mut ids = (*self.ids).clone();
        let mut lookup = (*self.lookup).clone();
        let mut deleted = false;

        for (index, update) in updates.into_iter().enumerate() {
            match update {
                RowUpdate::Upsert(row) => {
                    let id = get_id(&row).ok_or(GridError::MissingRowId { index })?;
                    match lookup.get(&id) {
                        Some(existing) => {
                            let merged = merge_rows(existing, row);
                            lookup.insert(id, Arc::new(merged));
                        }
                        None => {
                            ids.push(id.clone());
                            lookup.insert(id, Arc::new(row));
                        }
                    }
                }
                RowUpdate::Delete(id) => {
                    if lookup.remove(&id).is_some() {
                        deleted = true;
                    }
                }
            }
        }
        if deleted {
            ids.retain(|id| lookup.contains_key(id));
        }

        Ok(Self {
            ids: Arc::new(ids),
            lookup: Arc::new(lookup),
            ..self.clone()
        })
    }

    /// Insert or replace rows loaded for positions starting at `start`.
    ///
    /// New ids are inserted at `start` (clamped to the current length) in the
    /// order given; known ids are replaced in place.
    pub fn with_loaded_range(&self, start: usize, rows: Vec<Value>, get_id: &RowIdGetter) -> Result<Self> {
        let mut ids = (*self.ids).clone();
        let mut lookup = (*self.lookup).clone();
        let mut fresh = Vec::new();

        for (index, row) in rows.into_iter().enumerate() {
            let id = get_id(&row).ok_or(GridError::MissingRowId { index })?;
            if !lookup.contains_key(&id) {
                if fresh.contains(&id) {
                    return Err(GridError::DuplicateRowId(id));
                }
                fresh.push(id.clone());
            }
            lookup.insert(id, Arc::new(row));
        }
        let at = start.min(ids.len());
        ids.splice(at..at, fresh);

        Ok(Self {
            ids: Arc::new(ids),
            lookup: Arc::new(lookup),
            ..self.clone()
        })
    }

    /// Copy with new fetch flags.
    pub fn with_fetch_status(&self, loading: bool, error: Option<DataSourceError>) -> Self {
        Self {
            loading,
            error,
            ..self.clone()
        }
    }

    /// Ids in ingestion order.
    pub fn ids(&self) -> &Arc<Vec<RowId>> {
        &self.ids
    }

    /// Look up a row.
    pub fn get(&self, id: &RowId) -> Option<&GridRowModel> {
        self.lookup.get(id)
    }

    /// Whether a row is registered.
    pub fn contains(&self, id: &RowId) -> bool {
        self.lookup.contains_key(id)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if no rows are registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn merge_rows(existing: &Value, update: Value) -> Value {
    match (existing, update) {
        (Value::Object(old), Value::Object(new)) => {
            let mut merged = old.clone();
            merged.extend(new);
            Value::Object(merged)
        }
        (_, update) => update,
    }
}

impl fmt::Debug for RowsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowsState")
            .field("len", &self.len())
            .field("total_row_count", &self.total_row_count)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn getter() -> RowIdGetter {
        default_row_id_getter()
    }

    #[test]
    fn test_from_rows_keeps_order() {
        let rows = RowsState::from_rows(vec![json!({"id": 2}), json!({"id": 1})], &getter()).unwrap();
        assert_eq!(**rows.ids(), vec![RowId::Int(2), RowId::Int(1)]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_duplicate_and_missing_ids() {
        let err = RowsState::from_rows(vec![json!({"id": 1}), json!({"id": 1})], &getter());
        assert!(matches!(err, Err(GridError::DuplicateRowId(RowId::Int(1)))));

        let err = RowsState::from_rows(vec![json!({"id": 1}), json!({"name": "x"})], &getter());
        assert!(matches!(err, Err(GridError::MissingRowId { index: 1 })));
    }

    #[test]
    fn test_updates_replace_not_mutate() {
        let rows = RowsState::from_rows(vec![json!({"id": 1, "a": 1, "b": 2})], &getter()).unwrap();
        let before = rows.get(&RowId::Int(1)).cloned().unwrap();

        let next = rows
            .with_updates(vec![RowUpdate::Upsert(json!({"id": 1, "a": 5}))], &getter())
            .unwrap();
        let after = next.get(&RowId::Int(1)).unwrap();

        assert_eq!(before["a"], 1);
        assert_eq!(after["a"], 5);
        assert_eq!(after["b"], 2);
        assert!(!Arc::ptr_eq(&before, after));
    }

    #[test]
    fn test_upsert_appends_and_delete_removes() {
        let rows = RowsState::from_rows(vec![json!({"id": 1}), json!({"id": 2})], &getter()).unwrap();
        let next = rows
            .with_updates(
                vec![
                    RowUpdate::Upsert(json!({"id": 3})),
                    RowUpdate::from_json(json!({"id": 1, "_action": "delete"}), &getter()).unwrap(),
                ],
                &getter(),
            )
            .unwrap();
        assert_eq!(**next.ids(), vec![RowId::Int(2), RowId::Int(3)]);
        assert!(!next.contains(&RowId::Int(1)));
    }

    #[test]
    fn test_loaded_range_inserts_at_position() {
        let rows = RowsState::from_rows(vec![json!({"id": 1}), json!({"id": 4})], &getter()).unwrap();
        let next = rows
            .with_loaded_range(1, vec![json!({"id": 2}), json!({"id": 3}), json!({"id": 4, "x": 1})], &getter())
            .unwrap();
        let ids: Vec<i64> = next
            .ids()
            .iter()
            .map(|id| match id {
                RowId::Int(n) => *n,
                RowId::Str(_) => -1,
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(next.get(&RowId::Int(4)).unwrap()["x"], 1);
    }

    #[test]
    fn test_custom_id_getter() {
        let get_id: RowIdGetter = Arc::new(|row: &Value| row.get("key").and_then(RowId::from_json));
        let rows = RowsState::from_rows(vec![json!({"key": "a"})], &get_id).unwrap();
        assert!(rows.contains(&RowId::from("a")));
    }
}
