//! Tracing targets and debug formatting for the grid engine.
//!
//! Narrow log output to one subsystem with the constants in [`targets`]:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_grid::pipeline=debug,horizon_grid::data_source=debug")
//!     .init();
//! ```

use std::fmt;

use horizon_grid_core::logging::{TreeFormatOptions, TreeLine, format_tree};

use crate::tree::{RowNodeKind, RowTree};
use crate::value::RowId;

/// Target names for log filtering.
pub mod targets {
    /// Pipeline registry and stage execution.
    pub const PIPELINE: &str = "horizon_grid::pipeline";
    /// Filter engine.
    pub const FILTER: &str = "horizon_grid::filter";
    /// Sort engine.
    pub const SORT: &str = "horizon_grid::sort";
    /// Grouping, tree data and aggregation.
    pub const GROUPING: &str = "horizon_grid::grouping";
    /// Pagination slicer.
    pub const PAGINATION: &str = "horizon_grid::pagination";
    /// Virtualization window calculator.
    pub const VIRTUALIZATION: &str = "horizon_grid::virtualization";
    /// Data source and cache.
    pub const DATA_SOURCE: &str = "horizon_grid::data_source";
    /// Façade.
    pub const API: &str = "horizon_grid::api";
}

/// Formats a [`RowTree`] for debugging.
///
/// ```
/// use horizon_grid::{RowTree, RowTreeDebug, RowId};
///
/// let tree = RowTree::flat(&[RowId::from(1), RowId::from(2)]);
/// let text = RowTreeDebug::new(&tree).to_string();
/// assert_eq!(text.lines().count(), 3);
/// ```
pub struct RowTreeDebug<'a> {
    tree: &'a RowTree,
    options: TreeFormatOptions,
}

impl<'a> RowTreeDebug<'a> {
    /// Format with default options.
    pub fn new(tree: &'a RowTree) -> Self {
        Self {
            tree,
            options: TreeFormatOptions::default(),
        }
    }

    /// Format with custom options.
    pub fn with_options(tree: &'a RowTree, options: TreeFormatOptions) -> Self {
        Self { tree, options }
    }

    fn describe(&self, id: &RowId) -> TreeLine {
        let Some(node) = self.tree.get(id) else {
            return TreeLine {
                label: format!("<missing {id}>"),
                id: id.to_string(),
                kind: "missing",
            };
        };
        let label = match node.kind {
            _ if id.is_root() => "root".to_string(),
            RowNodeKind::Group if node.is_auto_generated => format!(
                "{}: {} ({})",
                node.grouping_field.as_deref().unwrap_or("path"),
                node.grouping_key
                    .as_ref()
                    .map(|k| k.to_display_string())
                    .unwrap_or_default(),
                node.descendant_count
            ),
            RowNodeKind::Group => format!("{id} ({})", node.descendant_count),
            RowNodeKind::Leaf => id.to_string(),
            RowNodeKind::Footer => "footer".to_string(),
        };
        let kind = if node.children_expanded || node.kind != RowNodeKind::Group {
            node.kind.as_str()
        } else {
            "group, collapsed"
        };
        TreeLine {
            label,
            id: id.to_string(),
            kind,
        }
    }
}

impl fmt::Display for RowTreeDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format_tree(
            &[RowId::root()],
            &self.options,
            |id| self.describe(id),
            |id| self.tree.children(id).to_vec(),
        );
        f.write_str(&text)
    }
}
