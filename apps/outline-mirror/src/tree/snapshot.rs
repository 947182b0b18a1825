use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::TreeNode;

#[derive(Debug, Default)]
struct TreeIndex {
    nodes: HashMap<String, Arc<TreeNode>>,
    parents: HashMap<String, String>,
}

impl TreeIndex {
    fn build(root: &Arc<TreeNode>) -> Self {
        let mut index = TreeIndex::default();
        index.nodes.insert(root.id.clone(), Arc::clone(root));
        let mut stack = vec![Arc::clone(root)];
        let mut duplicates = 0usize;
        while let Some(node) = stack.pop() {
            for child in node.children() {
                if index.nodes.contains_key(&child.id) {
                    duplicates += 1;
                    continue;
                }
                index.nodes.insert(child.id.clone(), Arc::clone(child));
                index.parents.insert(child.id.clone(), node.id.clone());
                stack.push(Arc::clone(child));
            }
        }
        if duplicates > 0 {
            warn!(
                target = "sync::index",
                root = %root.id,
                duplicates,
                "duplicate node ids; later occurrences are not indexed"
            );
        }
        index
    }
}

/// A mirrored tree plus its derived lookup index. The index is rebuilt
/// whenever a snapshot is created and is only reachable through the lookup
/// methods.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    root: Arc<TreeNode>,
    index: Arc<TreeIndex>,
}

impl TreeSnapshot {
    pub fn new(root: Arc<TreeNode>) -> Self {
        let index = Arc::new(TreeIndex::build(&root));
        Self { root, index }
    }

    pub fn root(&self) -> &Arc<TreeNode> {
        &self.root
    }

    pub fn node(&self, id: &str) -> Option<&Arc<TreeNode>> {
        self.index.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.nodes.contains_key(id)
    }

    /// `None` for the root and for unknown ids.
    pub fn parent_id(&self, id: &str) -> Option<&str> {
        self.index.parents.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.nodes.is_empty()
    }

    /// Ids from `id`'s parent up to the root.
    pub fn ancestors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        std::iter::successors(self.parent_id(id), move |current| self.parent_id(current))
    }
}

impl PartialEq for TreeSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}
