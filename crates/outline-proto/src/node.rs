use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire copy of one outline node and (optionally) its subtree.
///
/// `subnodes` distinguishes a true leaf (`null` or absent) from an
/// expandable node whose children are simply not included (`[]`).
/// Everything the view does not interpret travels in `payload`.
///
/// `id` may be omitted inside an update's `modelDataCopy`, where the
/// enclosing message already names the node; it then decodes as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_children: Option<bool>,
    #[serde(default)]
    pub subnodes: Option<Vec<NodeData>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NodeData {
    pub fn leaf(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collapsed: false,
            has_children: None,
            subnodes: None,
            payload: Map::new(),
        }
    }

    pub fn container(id: impl Into<String>, subnodes: Vec<NodeData>) -> Self {
        Self {
            subnodes: Some(subnodes),
            ..Self::leaf(id)
        }
    }

    pub fn with_collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    pub fn with_has_children(mut self, has_children: bool) -> Self {
        self.has_children = Some(has_children);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            if let Some(children) = &node.subnodes {
                stack.extend(children.iter());
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_subnodes_mean_leaf() {
        let absent: NodeData = serde_json::from_value(json!({ "id": "tab1" })).unwrap();
        let null: NodeData =
            serde_json::from_value(json!({ "id": "tab2", "subnodes": null })).unwrap();
        let empty: NodeData =
            serde_json::from_value(json!({ "id": "win1", "subnodes": [] })).unwrap();

        assert_eq!(absent.subnodes, None);
        assert_eq!(null.subnodes, None);
        assert_eq!(empty.subnodes, Some(Vec::new()));
    }

    #[test]
    fn unknown_fields_land_in_payload() {
        let node: NodeData = serde_json::from_value(json!({
            "id": "tab1",
            "collapsed": true,
            "hasChildren": false,
            "title": "Inbox",
            "url": "https://mail.example"
        }))
        .unwrap();

        assert!(node.collapsed);
        assert_eq!(node.has_children, Some(false));
        assert_eq!(node.payload["title"], "Inbox");
        assert_eq!(node.payload.len(), 2);
    }

    #[test]
    fn missing_id_decodes_as_empty() {
        let node: NodeData =
            serde_json::from_value(json!({ "title": "Untitled", "subnodes": null })).unwrap();
        assert_eq!(node.id, "");
        assert_eq!(node.payload["title"], "Untitled");
    }

    #[test]
    fn counts_every_node_in_subtree() {
        let tree = NodeData::container(
            "root",
            vec![
                NodeData::container("w1", vec![NodeData::leaf("t1"), NodeData::leaf("t2")]),
                NodeData::container("w2", Vec::new()),
            ],
        );
        assert_eq!(tree.node_count(), 5);
    }
}
