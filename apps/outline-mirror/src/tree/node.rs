use std::sync::Arc;

use outline_proto::NodeData;
use serde_json::{Map, Value};

/// Immutable mirrored node. Subtrees are shared between successive
/// snapshots through `Arc`, so identity (`Arc::ptr_eq`) tells whether a
/// subtree was touched by a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: String,
    pub collapsed: bool,
    /// `None` marks a true leaf that can never be expanded.
    pub children: Option<Vec<Arc<TreeNode>>>,
    pub payload: Map<String, Value>,
}

impl TreeNode {
    pub fn from_data(data: NodeData) -> Arc<TreeNode> {
        let children = data
            .subnodes
            .map(|subnodes| subnodes.into_iter().map(TreeNode::from_data).collect());
        Arc::new(TreeNode {
            id: data.id,
            collapsed: data.collapsed,
            children,
            payload: data.payload,
        })
    }

    pub fn to_data(&self) -> NodeData {
        NodeData {
            id: self.id.clone(),
            collapsed: self.collapsed,
            has_children: None,
            subnodes: self
                .children
                .as_ref()
                .map(|children| children.iter().map(|child| child.to_data()).collect()),
            payload: self.payload.clone(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// True when the mirror currently holds at least one child.
    pub fn has_known_children(&self) -> bool {
        self.children.as_ref().is_some_and(|children| !children.is_empty())
    }

    pub fn children(&self) -> &[Arc<TreeNode>] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn child_position(&self, id: &str) -> Option<usize> {
        self.children().iter().position(|child| child.id == id)
    }

    /// Shallow copy with a different child list.
    pub(crate) fn with_children(&self, children: Option<Vec<Arc<TreeNode>>>) -> TreeNode {
        TreeNode {
            id: self.id.clone(),
            collapsed: self.collapsed,
            children,
            payload: self.payload.clone(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.payload.get("title").and_then(Value::as_str)
    }
}
