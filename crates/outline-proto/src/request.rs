use serde::{Deserialize, Serialize};

/// Requests a view sends to the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request")]
pub enum Request {
    #[serde(rename = "request2bkg_get_tree_structure")]
    GetTree,
    #[serde(rename = "request2bkg_activateNode")]
    ActivateNode {
        #[serde(rename = "targetNodeId")]
        target_node_id: String,
    },
    #[serde(rename = "request2bkg_invertCollapsedState")]
    ToggleCollapse {
        #[serde(rename = "targetNodeId")]
        target_node_id: String,
    },
    #[serde(rename = "request2bkg_executeAction")]
    ExecuteAction {
        #[serde(rename = "targetNodeId")]
        target_node_id: String,
        action: String,
    },
    #[serde(rename = "request2bkg_onViewWindowBeforeUnload")]
    NotifyUnload {
        #[serde(rename = "globalViewId", default, skip_serializing_if = "Option::is_none")]
        global_view_id: Option<u64>,
    },
    #[serde(rename = "request2bkg_importTree")]
    ImportTree {
        #[serde(rename = "treeJson")]
        tree_json: String,
    },
    #[serde(rename = "request2bkg_exportTree")]
    ExportTree,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetTree => "get-tree",
            Request::ActivateNode { .. } => "activate-node",
            Request::ToggleCollapse { .. } => "toggle-collapse",
            Request::ExecuteAction { .. } => "execute-action",
            Request::NotifyUnload { .. } => "notify-unload",
            Request::ImportTree { .. } => "import-tree",
            Request::ExportTree => "export-tree",
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Requests are plain data; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
