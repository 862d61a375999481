//! The row tree: an arena of [`RowNode`]s keyed by row id.
//!
//! Nodes refer to each other only by id (`parent_id`, `children_ids`), so
//! the tree has no reference cycles and can be cloned and compared cheaply.
//! Every tree has a synthetic root (`RowId::root()`, depth 0); top-level rows
//! and groups are its children at depth 1.

use std::collections::HashMap;

use crate::value::{CellValue, RowId};

/// What a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowNodeKind {
    /// A data row without children.
    Leaf,
    /// A node with children: an auto-generated group or a tree-data parent.
    Group,
    /// Summary row appended to a group.
    Footer,
}

impl RowNodeKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leaf => "leaf",
            Self::Group => "group",
            Self::Footer => "footer",
        }
    }
}

/// A node of the row tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RowNode {
    /// Row id, or a generated id for groups and footers.
    pub id: RowId,
    /// Parent id; `None` only for the root.
    pub parent_id: Option<RowId>,
    /// Distance from the root.
    pub depth: usize,
    /// Node kind.
    pub kind: RowNodeKind,
    /// Children in display order.
    pub children_ids: Vec<RowId>,
    /// Field this group was created for.
    pub grouping_field: Option<String>,
    /// Group value (or path segment for tree data).
    pub grouping_key: Option<CellValue>,
    /// Whether children are shown.
    pub children_expanded: bool,
    /// Whether the node was generated rather than supplied as a row.
    pub is_auto_generated: bool,
    /// Number of non-generated, non-footer descendants.
    pub descendant_count: usize,
    /// Footer child, if footers are enabled.
    pub footer_id: Option<RowId>,
}

impl RowNode {
    /// The synthetic root.
    pub fn root() -> Self {
        Self {
            id: RowId::root(),
            parent_id: None,
            depth: 0,
            kind: RowNodeKind::Group,
            children_ids: Vec::new(),
            grouping_field: None,
            grouping_key: None,
            children_expanded: true,
            is_auto_generated: true,
            descendant_count: 0,
            footer_id: None,
        }
    }

    /// A data row.
    pub fn leaf(id: RowId, parent_id: RowId, depth: usize) -> Self {
        Self {
            id,
            parent_id: Some(parent_id),
            depth,
            kind: RowNodeKind::Leaf,
            children_ids: Vec::new(),
            grouping_field: None,
            grouping_key: None,
            children_expanded: false,
            is_auto_generated: false,
            descendant_count: 0,
            footer_id: None,
        }
    }

    /// A generated group.
    pub fn group(
        id: RowId,
        parent_id: RowId,
        depth: usize,
        field: Option<String>,
        key: CellValue,
    ) -> Self {
        Self {
            kind: RowNodeKind::Group,
            grouping_field: field,
            grouping_key: Some(key),
            is_auto_generated: true,
            ..Self::leaf(id, parent_id, depth)
        }
    }

    /// A footer for `group`.
    pub fn footer(group: &RowNode) -> Self {
        Self {
            kind: RowNodeKind::Footer,
            is_auto_generated: true,
            ..Self::leaf(footer_id(&group.id), group.id.clone(), group.depth + 1)
        }
    }

    /// Whether this node has children other than a footer.
    pub fn has_children(&self) -> bool {
        self.children_ids.iter().any(|c| Some(c) != self.footer_id.as_ref())
    }
}

/// Id of the footer of `group_id`.
pub fn footer_id(group_id: &RowId) -> RowId {
    RowId::Str(format!("auto-generated-group-footer-{group_id}"))
}

/// How the tree was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeKind {
    /// All rows are children of the root.
    #[default]
    Flat,
    /// Built from a grouping model.
    Grouping,
    /// Built from a tree-data path or parent function.
    TreeData,
}

/// Per-group expansion overrides, keyed by (path-derived) group id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionState {
    overrides: HashMap<RowId, bool>,
}

impl ExpansionState {
    /// Copy with one override set.
    pub fn with(&self, id: RowId, expanded: bool) -> Self {
        let mut overrides = self.overrides.clone();
        overrides.insert(id, expanded);
        Self { overrides }
    }

    /// Explicit override for a node, if any.
    pub fn get(&self, id: &RowId) -> Option<bool> {
        self.overrides.get(id).copied()
    }

    /// Whether `node` is expanded, falling back to `default_depth`
    /// (`-1` expands everything).
    pub fn is_expanded(&self, node: &RowNode, default_depth: i32) -> bool {
        if node.parent_id.is_none() {
            return true;
        }
        self.get(&node.id).unwrap_or_else(|| {
            default_depth < 0 || i64::try_from(node.depth).is_ok_and(|d| d <= i64::from(default_depth))
        })
    }
}

/// The row tree arena.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTree {
    nodes: HashMap<RowId, RowNode>,
    kind: TreeKind,
    max_depth: usize,
}

impl Default for RowTree {
    fn default() -> Self {
        Self::new(TreeKind::Flat)
    }
}

impl RowTree {
    /// A tree holding only the root.
    pub fn new(kind: TreeKind) -> Self {
        let root = RowNode::root();
        Self {
            nodes: HashMap::from([(root.id.clone(), root)]),
            kind,
            max_depth: 0,
        }
    }

    /// All ids as leaves under the root, in order.
    pub fn flat(ids: &[RowId]) -> Self {
        let mut tree = Self::new(TreeKind::Flat);
        let root = RowId::root();
        for id in ids {
            tree.insert(RowNode::leaf(id.clone(), root.clone(), 1));
        }
        tree.compute_descendant_counts();
        tree
    }

    /// How the tree was built.
    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// The root node.
    pub fn root(&self) -> &RowNode {
        // The root is inserted at construction and never removed.
        &self.nodes[&RowId::root()]
    }

    /// Look up a node.
    pub fn get(&self, id: &RowId) -> Option<&RowNode> {
        self.nodes.get(id)
    }

    /// Whether a node exists.
    pub fn contains(&self, id: &RowId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Children of a node, empty for unknown ids.
    pub fn children(&self, id: &RowId) -> &[RowId] {
        match self.nodes.get(id) {
            Some(node) => &node.children_ids,
            None => &[],
        }
    }

    /// Children of the root.
    pub fn top_level(&self) -> &[RowId] {
        self.children(&RowId::root())
    }

    /// Number of nodes, excluding the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns `true` if the root has no children.
    pub fn is_empty(&self) -> bool {
        self.top_level().is_empty()
    }

    /// Greatest node depth.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Iterate over all nodes in arbitrary order, root included.
    pub fn nodes(&self) -> impl Iterator<Item = &RowNode> {
        self.nodes.values()
    }

    /// Insert a node and append it to its parent's children.
    ///
    /// The parent must already be present.
    pub(crate) fn insert(&mut self, node: RowNode) {
        if let Some(parent) = node.parent_id.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children_ids.push(node.id.clone());
        }
        self.max_depth = self.max_depth.max(node.depth);
        self.nodes.insert(node.id.clone(), node);
    }

    pub(crate) fn get_mut(&mut self, id: &RowId) -> Option<&mut RowNode> {
        self.nodes.get_mut(id)
    }

    pub(crate) fn set_children(&mut self, id: &RowId, children: Vec<RowId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.children_ids = children;
        }
    }

    pub(crate) fn set_kind(&mut self, kind: TreeKind) {
        self.kind = kind;
    }

    /// Give a node a new id, relinking its parent and children.
    pub(crate) fn replace_id(&mut self, old: &RowId, new: RowId) {
        let Some(mut node) = self.nodes.remove(old) else { return };
        node.id = new.clone();
        if let Some(parent) = node.parent_id.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            for child in &mut parent.children_ids {
                if child == old {
                    *child = new.clone();
                }
            }
        }
        for child in &node.children_ids {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parent_id = Some(new.clone());
            }
        }
        self.nodes.insert(new, node);
    }

    /// All node ids in pre-order (root excluded), ignoring expansion.
    pub fn pre_order(&self) -> Vec<RowId> {
        self.walk(|_| true)
    }

    /// Visible node ids in pre-order: descendants of collapsed nodes are skipped.
    pub fn flatten_expanded(&self) -> Vec<RowId> {
        self.walk(|node| node.children_expanded)
    }

    fn walk(&self, descend: impl Fn(&RowNode) -> bool) -> Vec<RowId> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack: Vec<&RowId> = self.top_level().iter().rev().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else { continue };
            out.push(id.clone());
            if descend(node) {
                stack.extend(node.children_ids.iter().rev());
            }
        }
        out
    }

    /// Leaf descendants of a node (footers excluded), in child order.
    pub fn leaves_under(&self, id: &RowId) -> Vec<RowId> {
        let mut out = Vec::new();
        let mut stack: Vec<&RowId> = self.children(id).iter().rev().collect();
        while let Some(child) = stack.pop() {
            let Some(node) = self.nodes.get(child) else { continue };
            match node.kind {
                RowNodeKind::Leaf => out.push(child.clone()),
                RowNodeKind::Group => stack.extend(node.children_ids.iter().rev()),
                RowNodeKind::Footer => {}
            }
        }
        out
    }

    /// Recompute `descendant_count` for every node in one bottom-up pass.
    pub fn compute_descendant_counts(&mut self) {
        let mut order = vec![RowId::root()];
        order.extend(self.pre_order());
        for id in &order {
            if let Some(node) = self.nodes.get_mut(id) {
                node.descendant_count = 0;
            }
        }
        for id in order.iter().rev() {
            let Some(node) = self.nodes.get(id) else { continue };
            let own = usize::from(!node.is_auto_generated && node.kind != RowNodeKind::Footer);
            let contribution = node.descendant_count + own;
            if let Some(parent) = node.parent_id.clone() {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.descendant_count += contribution;
                }
            }
        }
    }

    /// Apply expansion state, returning a new tree only if any flag changes.
    pub fn with_expansion(&self, expansion: &ExpansionState, default_depth: i32) -> Option<Self> {
        let changed: Vec<(RowId, bool)> = self
            .nodes
            .values()
            .filter(|n| n.kind == RowNodeKind::Group)
            .filter_map(|n| {
                let expanded = expansion.is_expanded(n, default_depth);
                (expanded != n.children_expanded).then(|| (n.id.clone(), expanded))
            })
            .collect();
        if changed.is_empty() {
            return None;
        }
        let mut tree = self.clone();
        for (id, expanded) in changed {
            if let Some(node) = tree.nodes.get_mut(&id) {
                node.children_expanded = expanded;
            }
        }
        Some(tree)
    }

    /// Check the structural invariants: parent links match children lists
    /// and every depth equals its parent's depth plus one.
    pub fn validate(&self) -> Result<(), String> {
        for node in self.nodes.values() {
            let Some(parent_id) = &node.parent_id else {
                if !node.id.is_root() || node.depth != 0 {
                    return Err(format!("node '{}' has no parent", node.id));
                }
                continue;
            };
            let parent = self
                .nodes
                .get(parent_id)
                .ok_or_else(|| format!("node '{}' has unknown parent '{parent_id}'", node.id))?;
            if node.depth != parent.depth + 1 {
                return Err(format!(
                    "node '{}' has depth {} under parent depth {}",
                    node.id, node.depth, parent.depth
                ));
            }
            if !parent.children_ids.contains(&node.id) {
                return Err(format!("node '{}' missing from its parent's children", node.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped() -> RowTree {
        let root = RowId::root();
        let mut tree = RowTree::new(TreeKind::Grouping);
        let a = RowId::from("g-a");
        tree.insert(RowNode::group(a.clone(), root.clone(), 1, Some("company".into()), CellValue::String("A".into())));
        tree.insert(RowNode::leaf(RowId::from(1), a.clone(), 2));
        tree.insert(RowNode::leaf(RowId::from(2), a.clone(), 2));
        let b = RowId::from("g-b");
        tree.insert(RowNode::group(b.clone(), root, 1, Some("company".into()), CellValue::String("B".into())));
        tree.insert(RowNode::leaf(RowId::from(3), b, 2));
        tree.compute_descendant_counts();
        tree
    }

    #[test]
    fn test_flat_tree() {
        let tree = RowTree::flat(&[RowId::from(1), RowId::from(2)]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.root().depth, 0);
        assert_eq!(tree.root().descendant_count, 2);
        assert_eq!(tree.get(&RowId::from(1)).unwrap().depth, 1);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_descendant_counts() {
        let tree = grouped();
        assert_eq!(tree.root().descendant_count, 3);
        assert_eq!(tree.get(&RowId::from("g-a")).unwrap().descendant_count, 2);
        assert_eq!(tree.get(&RowId::from("g-b")).unwrap().descendant_count, 1);
        assert_eq!(tree.max_depth(), 2);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_flatten_respects_expansion() {
        let tree = grouped();
        assert_eq!(tree.flatten_expanded(), vec![RowId::from("g-a"), RowId::from("g-b")]);

        let expansion = ExpansionState::default().with(RowId::from("g-b"), true);
        let tree = tree.with_expansion(&expansion, 0).unwrap();
        assert_eq!(
            tree.flatten_expanded(),
            vec![RowId::from("g-a"), RowId::from("g-b"), RowId::from(3)]
        );
        assert!(tree.with_expansion(&expansion, 0).is_none());
        assert_eq!(tree.pre_order().len(), 5);
    }

    #[test]
    fn test_default_depth() {
        let tree = grouped();
        let all = tree.with_expansion(&ExpansionState::default(), -1).unwrap();
        assert_eq!(all.flatten_expanded().len(), 5);
        let node = tree.get(&RowId::from("g-a")).unwrap();
        assert!(ExpansionState::default().is_expanded(node, 1));
        assert!(!ExpansionState::default().is_expanded(node, 0));
    }

    #[test]
    fn test_leaves_under() {
        let tree = grouped();
        assert_eq!(tree.leaves_under(&RowId::root()), vec![RowId::from(1), RowId::from(2), RowId::from(3)]);
    }

    #[test]
    fn test_validate_detects_bad_depth() {
        let mut tree = grouped();
        tree.get_mut(&RowId::from(3)).unwrap().depth = 5;
        assert!(tree.validate().is_err());
    }
}
