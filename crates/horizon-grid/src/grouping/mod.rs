//! Grouping engine: builds the row tree from flat rows.
//!
//! Three shapes are supported:
//!
//! - **Flat**: no grouping model, every passing row is a child of the root.
//! - **Grouping**: one group level per grouping field. Group ids are derived
//!   from the path of `field/key` segments, so a group keeps its id (and with
//!   it its expansion state) across rebuilds.
//! - **Tree data**: rows carry their own hierarchy, either as a path of
//!   segments or as a parent id. Missing path ancestors are generated.
//!   Parent-id cycles are detected and the cyclic chain is left out of the
//!   tree.
//!
//! Trees are always rebuilt wholesale; nodes are never patched in place.

pub mod aggregation;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::{ColumnDef, ColumnsState};
use crate::config::{AggregationRowsScope, GridConfig};
use crate::error::{GridWarning, StructuralError};
use crate::filter::FilterResult;
use crate::logging::targets;
use crate::rows::RowsState;
use crate::tree::{ExpansionState, RowNode, RowNodeKind, RowTree, TreeKind};
use crate::value::{CellValue, RowId};

/// Ordered grouping fields; the first field produces depth-1 groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupingModel(pub Vec<String>);

impl GroupingModel {
    /// Create a model.
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if no field is grouped.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Returns the tree-data path of a row.
pub type TreeDataPathFn = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;
/// Returns the parent id of a row, `None` for top-level rows.
pub type ParentIdFn = Arc<dyn Fn(&Value) -> Option<RowId> + Send + Sync>;

/// Where tree data gets its hierarchy from.
#[derive(Clone)]
pub enum TreeDataSource {
    /// Each row supplies its full path.
    Path(TreeDataPathFn),
    /// Each row supplies its parent id.
    ParentId(ParentIdFn),
}

impl TreeDataSource {
    /// Hierarchy from a path function.
    pub fn path<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Vec<String> + Send + Sync + 'static,
    {
        Self::Path(Arc::new(f))
    }

    /// Hierarchy from a parent-id function.
    pub fn parent_id<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Option<RowId> + Send + Sync + 'static,
    {
        Self::ParentId(Arc::new(f))
    }
}

impl fmt::Debug for TreeDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(_) => f.write_str("TreeDataSource::Path(..)"),
            Self::ParentId(_) => f.write_str("TreeDataSource::ParentId(..)"),
        }
    }
}

/// Group id → every leaf under it regardless of filtering (root included).
pub type GroupMembership = HashMap<RowId, Vec<RowId>>;

/// Output of a tree build.
#[derive(Debug, Default)]
pub struct TreeBuild {
    /// The new tree.
    pub tree: RowTree,
    /// Unfiltered leaves per group, when aggregating over all rows.
    pub membership: Option<GroupMembership>,
    /// Skipped model entries and recoverable data problems.
    pub warnings: Vec<GridWarning>,
    /// Rows left out because of structural problems.
    pub errors: Vec<StructuralError>,
}

/// Inputs shared by all tree builders.
pub struct GroupingInput<'a> {
    /// The row registry.
    pub rows: &'a RowsState,
    /// The column model.
    pub columns: &'a ColumnsState,
    /// Candidate ids before filtering, in order.
    pub candidates: &'a [RowId],
    /// Filter result over `candidates`.
    pub filter: &'a FilterResult,
    /// Engine configuration.
    pub config: &'a GridConfig,
}

/// Build the row tree for the current grouping model or tree-data source.
pub fn build_row_tree(
    input: &GroupingInput<'_>,
    model: &GroupingModel,
    tree_data: Option<&TreeDataSource>,
) -> TreeBuild {
    let mut build = if input.config.tree_data {
        match tree_data {
            Some(TreeDataSource::Path(path)) => build_path_tree(input, path),
            Some(TreeDataSource::ParentId(parent)) => build_parent_tree(input, parent),
            None => {
                tracing::warn!(target: targets::GROUPING, "tree data enabled without a tree data source");
                TreeBuild {
                    tree: RowTree::flat(input.filter.passing()),
                    warnings: vec![GridWarning::MissingTreeDataSource],
                    ..TreeBuild::default()
                }
            }
        }
    } else {
        build_grouped_tree(input, model)
    };

    if input.config.group_footers && build.tree.kind() != TreeKind::Flat {
        add_footers(&mut build.tree);
    }
    build.tree.compute_descendant_counts();

    tracing::debug!(
        target: targets::GROUPING,
        kind = ?build.tree.kind(),
        nodes = build.tree.len(),
        depth = build.tree.max_depth(),
        warnings = build.warnings.len(),
        errors = build.errors.len(),
        "built row tree"
    );
    build
}

/// Percent-escapes the characters that delimit generated id segments.
fn escape_segment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' | '-' | '/' | '#' | ',' | '[' | ']' => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Path segment used in generated ids.
///
/// Strings appear escaped as-is; every other kind is tagged with `#` so a
/// number, a boolean or a missing value never shares an id with the string
/// that displays the same.
fn key_segment(key: &CellValue) -> String {
    match key {
        CellValue::String(s) => escape_segment(s),
        CellValue::Null => "#null".to_string(),
        CellValue::Bool(b) => format!("#bool:{b}"),
        CellValue::Number(_) => format!("#number:{}", escape_segment(&key.to_display_string())),
        CellValue::Date(_) => format!("#date:{}", escape_segment(&key.to_display_string())),
        CellValue::List(items) => {
            let items: Vec<String> = items.iter().map(key_segment).collect();
            format!("#list:[{}]", items.join(","))
        }
    }
}

fn initial_expansion(node: &mut RowNode, config: &GridConfig) {
    node.children_expanded =
        ExpansionState::default().is_expanded(node, config.default_group_expansion_depth);
}

fn group_id(prefix: Option<&RowId>, field: &str, key: &CellValue) -> RowId {
    let part = format!("{}/{}", escape_segment(field), key_segment(key));
    RowId::Str(match prefix {
        Some(parent) => format!("{parent}-{part}"),
        None => format!("auto-generated-row-{part}"),
    })
}

fn grouping_columns(
    model: &GroupingModel,
    columns: &ColumnsState,
    warnings: &mut Vec<GridWarning>,
) -> Vec<Arc<ColumnDef>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for field in &model.0 {
        match columns.get(field) {
            Some(column) if seen.insert(field.as_str()) => out.push(column.clone()),
            Some(_) => {}
            None => {
                tracing::warn!(target: targets::GROUPING, field = %field, "grouping model references unknown field");
                warnings.push(GridWarning::UnknownField {
                    model: "grouping",
                    field: field.clone(),
                });
            }
        }
    }
    out
}

/// Group ids along the path of one row.
fn group_path(row: Option<&Value>, columns: &[Arc<ColumnDef>]) -> Vec<(RowId, String, CellValue)> {
    let mut path: Vec<(RowId, String, CellValue)> = Vec::with_capacity(columns.len());
    for column in columns {
        let key = row.map_or(CellValue::Null, |r| column.value(r));
        let id = group_id(path.last().map(|(id, _, _)| id), &column.field, &key);
        path.push((id, column.field.clone(), key));
    }
    path
}

fn build_grouped_tree(input: &GroupingInput<'_>, model: &GroupingModel) -> TreeBuild {
    let mut warnings = Vec::new();
    let columns = grouping_columns(model, input.columns, &mut warnings);
    if columns.is_empty() {
        return TreeBuild {
            tree: RowTree::flat(input.filter.passing()),
            warnings,
            ..TreeBuild::default()
        };
    }

    let root = RowId::root();
    let mut tree = RowTree::new(TreeKind::Grouping);
    for id in input.filter.passing() {
        let row = input.rows.get(id).map(|r| &**r);
        let mut parent = root.clone();
        for (depth, (gid, field, key)) in group_path(row, &columns).into_iter().enumerate() {
            if !tree.contains(&gid) {
                let mut node = RowNode::group(gid.clone(), parent, depth + 1, Some(field), key);
                initial_expansion(&mut node, input.config);
                tree.insert(node);
            }
            parent = gid;
        }
        tree.insert(RowNode::leaf(id.clone(), parent, columns.len() + 1));
    }

    let membership = (input.config.aggregation_rows_scope == AggregationRowsScope::All).then(|| {
        let mut membership = GroupMembership::new();
        for id in input.candidates {
            let row = input.rows.get(id).map(|r| &**r);
            for (gid, _, _) in group_path(row, &columns) {
                if tree.contains(&gid) {
                    membership.entry(gid).or_default().push(id.clone());
                }
            }
            membership.entry(root.clone()).or_default().push(id.clone());
        }
        membership
    });

    TreeBuild {
        tree,
        membership,
        warnings,
        errors: Vec::new(),
    }
}

fn auto_path_id(prefix: &[String]) -> RowId {
    let segments: Vec<String> = prefix.iter().map(|s| escape_segment(s)).collect();
    RowId::Str(format!("auto-generated-row-{}", segments.join("/")))
}

fn build_path_tree(input: &GroupingInput<'_>, get_path: &TreeDataPathFn) -> TreeBuild {
    let root = RowId::root();
    let mut warnings = Vec::new();
    let mut full = RowTree::new(TreeKind::TreeData);
    let mut by_path: HashMap<Vec<String>, RowId> = HashMap::new();

    for id in input.candidates {
        let mut path = input.rows.get(id).map(|row| get_path(row)).unwrap_or_default();
        if path.is_empty() {
            path = vec![id.to_string()];
        }

        let mut parent = root.clone();
        for depth in 0..path.len() - 1 {
            let prefix = &path[..=depth];
            parent = match by_path.get(prefix) {
                Some(existing) => existing.clone(),
                None => {
                    let gid = auto_path_id(prefix);
                    let key = CellValue::String(path[depth].clone());
                    full.insert(RowNode::group(gid.clone(), parent, depth + 1, None, key));
                    by_path.insert(prefix.to_vec(), gid.clone());
                    gid
                }
            };
        }

        match by_path.get(&path).cloned() {
            Some(existing) if full.get(&existing).is_some_and(|n| n.is_auto_generated) => {
                // A real row for a path that was generated as an ancestor takes its place.
                full.replace_id(&existing, id.clone());
                if let Some(node) = full.get_mut(id) {
                    node.is_auto_generated = false;
                }
                by_path.insert(path, id.clone());
            }
            Some(_) => {
                tracing::warn!(target: targets::GROUPING, row = %id, "duplicate tree data path");
                warnings.push(GridWarning::DuplicatePath {
                    row_id: id.clone(),
                    path,
                });
            }
            None => {
                let mut node = RowNode::leaf(id.clone(), parent, path.len());
                node.grouping_key = path.last().cloned().map(CellValue::String);
                full.insert(node);
                by_path.insert(path, id.clone());
            }
        }
    }

    finish_tree_data(input, full, warnings, Vec::new())
}

#[derive(Clone, Copy)]
enum Resolved {
    Depth(usize),
    Cyclic,
}

fn build_parent_tree(input: &GroupingInput<'_>, get_parent: &ParentIdFn) -> TreeBuild {
    let root = RowId::root();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let declared: HashMap<&RowId, Option<RowId>> = input
        .candidates
        .iter()
        .map(|id| (id, input.rows.get(id).and_then(|row| get_parent(row))))
        .collect();

    // Effective parent: declared parent if it exists, otherwise the root.
    let mut parent_of: HashMap<&RowId, RowId> = HashMap::with_capacity(declared.len());
    for id in input.candidates {
        let effective = match declared.get(id).and_then(Option::as_ref) {
            Some(p) if declared.contains_key(p) => p.clone(),
            Some(p) => {
                tracing::warn!(target: targets::GROUPING, row = %id, parent = %p, "tree data parent not found");
                warnings.push(GridWarning::OrphanedParent {
                    row_id: id.clone(),
                    parent_id: p.clone(),
                });
                root.clone()
            }
            None => root.clone(),
        };
        parent_of.insert(id, effective);
    }

    let mut resolved: HashMap<&RowId, Resolved> = HashMap::with_capacity(declared.len());
    for start in input.candidates {
        if resolved.contains_key(start) {
            continue;
        }
        let mut chain: Vec<&RowId> = Vec::new();
        let mut on_chain: HashSet<&RowId> = HashSet::new();
        let mut current = start;
        let base = loop {
            if let Some(&state) = resolved.get(current) {
                break state;
            }
            if on_chain.contains(current) {
                let begin = chain.iter().position(|id| *id == current).unwrap_or(0);
                let cycle: Vec<RowId> = chain[begin..].iter().map(|id| (*id).clone()).collect();
                tracing::error!(target: targets::GROUPING, row = %current, length = cycle.len(), "cyclic tree data");
                errors.push(StructuralError::Cycle {
                    row_id: current.clone(),
                    chain: cycle,
                });
                break Resolved::Cyclic;
            }
            chain.push(current);
            on_chain.insert(current);
            match parent_of.get(current) {
                Some(parent) if !parent.is_root() => {
                    let Some((&key, _)) = declared.get_key_value(parent) else { break Resolved::Depth(0) };
                    current = key;
                }
                _ => break Resolved::Depth(0),
            }
        };

        let mut depth = match base {
            Resolved::Depth(d) => d,
            Resolved::Cyclic => 0,
        };
        for id in chain.into_iter().rev() {
            let state = match base {
                Resolved::Cyclic => Resolved::Cyclic,
                Resolved::Depth(_) => {
                    depth += 1;
                    Resolved::Depth(depth)
                }
            };
            resolved.insert(id, state);
        }
    }

    // Insert shallow nodes first so every parent exists before its children;
    // the stable sort keeps sibling order equal to row order.
    let mut placed: Vec<(&RowId, usize)> = input
        .candidates
        .iter()
        .filter_map(|id| match resolved.get(id) {
            Some(Resolved::Depth(d)) => Some((id, *d)),
            _ => None,
        })
        .collect();
    placed.sort_by_key(|(_, depth)| *depth);

    let mut full = RowTree::new(TreeKind::TreeData);
    for (id, depth) in placed {
        let parent = parent_of.get(id).cloned().unwrap_or_else(|| root.clone());
        full.insert(RowNode::leaf(id.clone(), parent, depth));
    }

    finish_tree_data(input, full, warnings, errors)
}

/// Apply the filter to a complete tree-data tree, then fix up node kinds.
fn finish_tree_data(
    input: &GroupingInput<'_>,
    full: RowTree,
    warnings: Vec<GridWarning>,
    errors: Vec<StructuralError>,
) -> TreeBuild {
    let membership = (input.config.aggregation_rows_scope == AggregationRowsScope::All)
        .then(|| leaf_membership(&full));

    let keep = kept_nodes(&full, input.filter, input.config.disable_child_filtering);
    let mut tree = RowTree::new(TreeKind::TreeData);
    for id in full.pre_order() {
        if !keep.contains(&id) {
            continue;
        }
        let Some(node) = full.get(&id) else { continue };
        let mut node = RowNode {
            children_ids: Vec::new(),
            ..node.clone()
        };
        if full.children(&id).iter().any(|c| keep.contains(c)) {
            node.kind = RowNodeKind::Group;
            initial_expansion(&mut node, input.config);
        } else {
            node.kind = RowNodeKind::Leaf;
        }
        tree.insert(node);
    }
    tree.set_kind(TreeKind::TreeData);

    TreeBuild {
        tree,
        membership,
        warnings,
        errors,
    }
}

fn kept_nodes(full: &RowTree, filter: &FilterResult, disable_child_filtering: bool) -> HashSet<RowId> {
    let order = full.pre_order();
    let mut subtree_passes: HashSet<RowId> = HashSet::new();
    for id in order.iter().rev() {
        let passes = filter.passes(id) || full.children(id).iter().any(|c| subtree_passes.contains(c));
        if passes {
            subtree_passes.insert(id.clone());
        }
    }
    if !disable_child_filtering {
        return subtree_passes;
    }

    // Only top-level rows are filtered; kept tops bring their whole subtree.
    let mut keep = HashSet::new();
    for top in full.top_level() {
        let top_passes = match full.get(top) {
            Some(node) if node.is_auto_generated => subtree_passes.contains(top),
            _ => filter.passes(top),
        };
        if top_passes {
            keep.insert(top.clone());
            let mut stack: Vec<&RowId> = full.children(top).iter().collect();
            while let Some(id) = stack.pop() {
                keep.insert(id.clone());
                stack.extend(full.children(id));
            }
        }
    }
    keep
}

fn leaf_membership(tree: &RowTree) -> GroupMembership {
    let mut membership = GroupMembership::new();
    let mut order = vec![RowId::root()];
    order.extend(tree.pre_order());
    for id in order.iter().rev() {
        let Some(node) = tree.get(id) else { continue };
        let leaves = if node.children_ids.is_empty() {
            vec![id.clone()]
        } else {
            membership.get(id).cloned().unwrap_or_default()
        };
        if let Some(parent) = &node.parent_id {
            membership.entry(parent.clone()).or_default().extend(leaves);
        }
    }
    membership
}

fn add_footers(tree: &mut RowTree) {
    let groups: Vec<RowId> = tree
        .pre_order()
        .into_iter()
        .filter(|id| {
            tree.get(id)
                .is_some_and(|n| n.kind == RowNodeKind::Group && n.has_children())
        })
        .collect();
    for gid in groups {
        let Some(group) = tree.get(&gid) else { continue };
        let footer = RowNode::footer(group);
        let footer_id = footer.id.clone();
        tree.insert(footer);
        if let Some(group) = tree.get_mut(&gid) {
            group.footer_id = Some(footer_id);
        }
    }
}
