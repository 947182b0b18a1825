//! Stateless derivations a renderer needs from a snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{TreeNode, TreeSnapshot};

pub fn find_node<'a>(snapshot: &'a TreeSnapshot, id: &str) -> Option<&'a Arc<TreeNode>> {
    snapshot.node(id)
}

/// `None` for a true leaf, an empty slice for a collapsed node, otherwise
/// the children to draw.
pub fn renderable_children(node: &TreeNode) -> Option<&[Arc<TreeNode>]> {
    match node.children.as_deref() {
        None => None,
        Some(_) if node.collapsed => Some(&[]),
        Some(children) => Some(children),
    }
}

/// Expanded flag for every node that can hold children. Leaves are omitted.
pub fn build_open_map(root: &TreeNode) -> BTreeMap<String, bool> {
    let mut open = BTreeMap::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(children) = node.children.as_deref() {
            open.insert(node.id.clone(), !node.collapsed);
            stack.extend(children.iter().map(Arc::as_ref));
        }
    }
    open
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub id: String,
    pub depth: usize,
    pub expandable: bool,
    pub collapsed: bool,
    pub title: Option<String>,
}

/// Rows in display order, skipping the contents of collapsed nodes.
pub fn visible_rows(root: &TreeNode) -> Vec<VisibleRow> {
    let mut rows = Vec::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        rows.push(VisibleRow {
            id: node.id.clone(),
            depth,
            expandable: !node.is_leaf(),
            collapsed: node.collapsed,
            title: node.title().map(str::to_owned),
        });
        if let Some(children) = renderable_children(node) {
            stack.extend(children.iter().rev().map(|child| (child.as_ref(), depth + 1)));
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use outline_proto::NodeData;

    fn sample() -> Arc<TreeNode> {
        TreeNode::from_data(NodeData::container(
            "root",
            vec![
                NodeData::container("win_A", vec![NodeData::leaf("t1"), NodeData::leaf("t2")]),
                NodeData::container("win_B", vec![NodeData::leaf("t3")]).with_collapsed(true),
            ],
        ))
    }

    #[test]
    fn open_map_covers_internal_nodes_only() {
        let open = build_open_map(&sample());
        let expected: BTreeMap<String, bool> = [
            ("root".to_string(), true),
            ("win_A".to_string(), true),
            ("win_B".to_string(), false),
        ]
        .into_iter()
        .collect();
        assert_eq!(open, expected);
    }

    #[test]
    fn open_map_includes_empty_containers() {
        let root = TreeNode::from_data(NodeData::container(
            "root",
            vec![NodeData::container("empty", Vec::new())],
        ));
        assert_eq!(build_open_map(&root).get("empty"), Some(&true));
    }

    #[test]
    fn renderable_children_distinguishes_leaf_and_collapsed() {
        let root = sample();
        let snapshot = TreeSnapshot::new(Arc::clone(&root));
        let leaf = find_node(&snapshot, "t1").unwrap();
        let collapsed = find_node(&snapshot, "win_B").unwrap();
        assert!(renderable_children(leaf).is_none());
        assert_eq!(renderable_children(collapsed).map(<[_]>::len), Some(0));
        assert_eq!(renderable_children(&root).map(<[_]>::len), Some(2));
        assert!(find_node(&snapshot, "missing").is_none());
    }

    #[test]
    fn visible_rows_follow_display_order() {
        let rows = visible_rows(&sample());
        let ids: Vec<(&str, usize)> = rows.iter().map(|row| (row.id.as_str(), row.depth)).collect();
        assert_eq!(
            ids,
            vec![("root", 0), ("win_A", 1), ("t1", 2), ("t2", 2), ("win_B", 1)]
        );
        assert!(rows[4].expandable);
        assert!(rows[4].collapsed);
        assert!(!rows[2].expandable);
    }
}
