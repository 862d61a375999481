//! Error and warning types for the grid engine.
//!
//! Hard failures are [`GridError`]s returned through `Result`. Configuration
//! problems that the pipeline can route around are [`GridWarning`]s: they are
//! logged and published as [`GridEvent::Warning`](crate::GridEvent::Warning),
//! never returned as `Err`.

use std::fmt;

use thiserror::Error;

use crate::value::RowId;

/// Result type alias for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors returned by grid operations.
#[derive(Debug, Error)]
pub enum GridError {
    /// Two ingested rows share an id.
    #[error("duplicate row id '{0}'")]
    DuplicateRowId(RowId),

    /// An ingested row has no usable id.
    #[error("row at position {index} has no id")]
    MissingRowId {
        /// Position of the row in the ingested batch.
        index: usize,
    },

    /// Parent references form a cycle.
    #[error("cyclic tree data: row '{row_id}' is its own ancestor (chain: {})", format_chain(.chain))]
    CyclicTreeData {
        /// The row where the cycle was detected.
        row_id: RowId,
        /// The rows that form the cycle, in parent order.
        chain: Vec<RowId>,
    },

    /// A row id was not found in the registry.
    #[error("unknown row '{0}'")]
    UnknownRow(RowId),

    /// A column field was not found in the column model.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Configuration text could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Initial state could not be (de)serialized.
    #[error("state serialization failed: {0}")]
    State(#[from] serde_json::Error),

    /// A data source operation failed.
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
}

impl From<toml::de::Error> for GridError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

fn format_chain(chain: &[RowId]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors produced by a [`DataSource`](crate::data_source::DataSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataSourceError {
    /// `get_rows` failed.
    #[error("failed to fetch rows: {0}")]
    Fetch(String),

    /// `update_row` failed.
    #[error("failed to update row: {0}")]
    Update(String),

    /// The source does not implement the requested operation.
    #[error("operation not supported by this data source")]
    NotSupported,
}

/// A recoverable configuration problem.
///
/// The offending entry is skipped and processing continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridWarning {
    /// A model references a field that no column defines.
    UnknownField {
        /// Which model the entry belongs to (`"filter"`, `"sort"`, ...).
        model: &'static str,
        /// The unknown field.
        field: String,
    },
    /// A filter item names an operator the column does not provide.
    UnknownOperator {
        /// Column field.
        field: String,
        /// Operator value from the filter item.
        operator: String,
    },
    /// The aggregation model names a function that is not registered.
    MissingAggregation {
        /// Column field.
        field: String,
        /// Function name.
        function: String,
    },
    /// The aggregation function cannot be applied to this column.
    UnsupportedAggregation {
        /// Column field.
        field: String,
        /// Function name.
        function: String,
    },
    /// A tree-data row references a parent that does not exist.
    OrphanedParent {
        /// The row whose parent is missing.
        row_id: RowId,
        /// The missing parent id.
        parent_id: RowId,
    },
    /// Two tree-data rows resolve to the same path; the later one is skipped.
    DuplicatePath {
        /// The skipped row.
        row_id: RowId,
        /// The duplicated path.
        path: Vec<String>,
    },
    /// Tree data is enabled but no tree-data source was provided.
    MissingTreeDataSource,
}

impl fmt::Display for GridWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField { model, field } => {
                write!(f, "{model} model references unknown field '{field}'")
            }
            Self::UnknownOperator { field, operator } => {
                write!(f, "column '{field}' has no filter operator '{operator}'")
            }
            Self::MissingAggregation { field, function } => {
                write!(f, "aggregation '{function}' for column '{field}' is not registered")
            }
            Self::UnsupportedAggregation { field, function } => {
                write!(f, "aggregation '{function}' cannot be applied to column '{field}'")
            }
            Self::OrphanedParent { row_id, parent_id } => {
                write!(f, "row '{row_id}' references unknown parent '{parent_id}'")
            }
            Self::DuplicatePath { row_id, path } => {
                write!(f, "row '{row_id}' duplicates tree path '{}'", path.join("/"))
            }
            Self::MissingTreeDataSource => {
                write!(f, "tree data is enabled but no path or parent function is set")
            }
        }
    }
}

/// A structural failure found while building the row tree.
///
/// Kept separately from [`GridError`] so it can be cloned into state and
/// events; converted into `GridError` when returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// Parent references form a cycle.
    Cycle {
        /// The row where the cycle was detected.
        row_id: RowId,
        /// The rows that form the cycle.
        chain: Vec<RowId>,
    },
}

impl From<StructuralError> for GridError {
    fn from(err: StructuralError) -> Self {
        match err {
            StructuralError::Cycle { row_id, chain } => Self::CyclicTreeData { row_id, chain },
        }
    }
}
