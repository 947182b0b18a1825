use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{NodeData, ProtocolError, ProtocolResult};

pub mod commands {
    pub const INIT: &str = "msg2view_initTreeView";
    pub const NODE_UPDATED: &str = "msg2view_notifyObserver_onNodeUpdated";
    pub const NOTIFY: &str = "msg2view_notifyObserver";
    pub const SET_CURSOR: &str = "msg2view_setCursorHere";
    pub const IMPORT_RESULT: &str = "msg2view_importResult";
    pub const EXPORT_RESULT: &str = "msg2view_exportResult";

    pub const ALL: &[&str] = &[
        INIT,
        NODE_UPDATED,
        NOTIFY,
        SET_CURSOR,
        IMPORT_RESULT,
        EXPORT_RESULT,
    ];
}

/// Every message the background can push to a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum ProtocolMessage {
    #[serde(rename = "msg2view_initTreeView")]
    Init(InitTree),
    #[serde(rename = "msg2view_notifyObserver_onNodeUpdated")]
    NodeUpdated(NodeUpdated),
    #[serde(rename = "msg2view_notifyObserver")]
    Notify(Notify),
    #[serde(rename = "msg2view_setCursorHere")]
    SetCursor(SetCursor),
    #[serde(rename = "msg2view_importResult")]
    ImportResult(ImportResult),
    #[serde(rename = "msg2view_exportResult")]
    ExportResult(ExportResult),
    /// Keep-alive marker; has no `command` on the wire.
    #[serde(skip)]
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitTree {
    pub root_node: NodeData,
    pub global_view_id: u64,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdated {
    pub id: String,
    pub model_data_copy: NodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notify {
    pub id: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl Notify {
    pub fn new(id: impl Into<String>, event: &str) -> Self {
        Self {
            id: id.into(),
            parameters: vec![Value::String(event.to_string())],
        }
    }

    /// The observer event named by the first parameter.
    pub fn event(&self) -> NotifyEvent {
        match self.parameters.first().and_then(Value::as_str) {
            Some(name) => NotifyEvent::parse(name),
            None => NotifyEvent::Unrecognized(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    NodeRemoved,
    NodeMoved,
    NodeReplaced,
    ParentUpdated,
    WindowClosed,
    Unrecognized(String),
}

impl NotifyEvent {
    pub const NODE_REMOVED: &'static str = "onNodeRemoved";
    pub const NODE_MOVED: &'static str = "onNodeMoved";
    pub const NODE_REPLACED: &'static str = "onNodeReplaced";
    pub const PARENT_UPDATED: &'static str = "onParentUpdated";
    pub const WINDOW_CLOSED: &'static str = "onWindowClosed";

    pub fn parse(name: &str) -> Self {
        match name {
            Self::NODE_REMOVED => Self::NodeRemoved,
            Self::NODE_MOVED => Self::NodeMoved,
            Self::NODE_REPLACED => Self::NodeReplaced,
            Self::PARENT_UPDATED => Self::ParentUpdated,
            Self::WINDOW_CLOSED => Self::WindowClosed,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Events that reshape the tree in ways a single-path patch cannot express.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NodeMoved | Self::NodeReplaced | Self::ParentUpdated | Self::WindowClosed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCursor {
    pub target_id: String,
    #[serde(default)]
    pub do_not_scroll_view: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    #[serde(default)]
    pub node_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn heartbeat_marker() -> Value {
    json!({ "marker": true })
}

pub fn is_heartbeat(value: &Value) -> bool {
    value.get("command").is_none() && value.get("marker").and_then(Value::as_bool) == Some(true)
}

pub fn decode_message(value: Value) -> ProtocolResult<ProtocolMessage> {
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    if is_heartbeat(&value) {
        return Ok(ProtocolMessage::Heartbeat);
    }
    let command = match value.get("command").and_then(Value::as_str) {
        Some(command) => command.to_string(),
        None => return Err(ProtocolError::MissingDiscriminant("command")),
    };
    if !commands::ALL.contains(&command.as_str()) {
        return Err(ProtocolError::UnknownCommand(command));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { command, source })
}

pub fn encode_message(message: &ProtocolMessage) -> Value {
    match message {
        ProtocolMessage::Heartbeat => heartbeat_marker(),
        // Every other variant is plain data and always serializes.
        other => serde_json::to_value(other).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_init_with_nested_tree() {
        let value = json!({
            "command": commands::INIT,
            "rootNode": {
                "id": "root",
                "subnodes": [
                    { "id": "win_A", "subnodes": [{ "id": "tab_x", "title": "x" }] },
                    { "id": "win_B", "collapsed": true, "hasChildren": true, "subnodes": [] }
                ]
            },
            "globalViewId": 7,
            "instanceId": "bg-1"
        });

        let ProtocolMessage::Init(init) = decode_message(value).unwrap() else {
            panic!("expected init");
        };
        assert_eq!(init.global_view_id, 7);
        assert_eq!(init.instance_id, "bg-1");
        assert_eq!(init.root_node.node_count(), 4);
        let win_b = &init.root_node.subnodes.as_ref().unwrap()[1];
        assert!(win_b.collapsed);
        assert_eq!(win_b.has_children, Some(true));
    }

    #[test]
    fn heartbeat_is_recognized_without_command() {
        let decoded = decode_message(heartbeat_marker()).unwrap();
        assert_eq!(decoded, ProtocolMessage::Heartbeat);
        assert_eq!(encode_message(&decoded), json!({ "marker": true }));
    }

    #[test]
    fn rejects_unknown_and_malformed_commands() {
        let unknown = decode_message(json!({ "command": "msg2view_teleport" })).unwrap_err();
        assert!(matches!(unknown, ProtocolError::UnknownCommand(name) if name == "msg2view_teleport"));

        let malformed =
            decode_message(json!({ "command": commands::SET_CURSOR, "targetId": 5 })).unwrap_err();
        assert!(matches!(malformed, ProtocolError::Malformed { .. }));

        let missing = decode_message(json!({ "id": "x" })).unwrap_err();
        assert!(matches!(missing, ProtocolError::MissingDiscriminant("command")));

        assert!(matches!(
            decode_message(json!(["not", "an", "object"])),
            Err(ProtocolError::NotAnObject)
        ));
    }

    #[test]
    fn notify_event_names_map_to_kinds() {
        let removed = Notify::new("tab1", NotifyEvent::NODE_REMOVED);
        assert_eq!(removed.event(), NotifyEvent::NodeRemoved);
        assert!(!removed.event().is_structural());

        let moved = Notify::new("tab1", NotifyEvent::NODE_MOVED);
        assert!(moved.event().is_structural());

        let novel = Notify::new("tab1", "onNodeTeleported");
        assert_eq!(
            novel.event(),
            NotifyEvent::Unrecognized("onNodeTeleported".into())
        );

        let bare = Notify {
            id: "tab1".into(),
            parameters: Vec::new(),
        };
        assert_eq!(bare.event(), NotifyEvent::Unrecognized(String::new()));
    }

    #[test]
    fn encodes_with_stable_field_names() {
        let message = ProtocolMessage::SetCursor(SetCursor {
            target_id: "tab9".into(),
            do_not_scroll_view: true,
        });
        assert_eq!(
            encode_message(&message),
            json!({
                "command": commands::SET_CURSOR,
                "targetId": "tab9",
                "doNotScrollView": true
            })
        );
    }
}
