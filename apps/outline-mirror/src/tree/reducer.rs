//! Pure `(state, message) -> state` transitions for the mirrored tree.
//!
//! Every transition produces a fresh `Arc<MirrorState>` (or hands back the
//! previous one untouched). Patches clone only the ancestor path of the
//! affected node, so unrelated subtrees keep their identity across
//! snapshots. Anything a patch cannot express raises `needs_full_refresh`
//! instead of guessing.

use std::sync::Arc;

use outline_proto::{
    ExportResult, ImportResult, InitTree, NodeData, NodeUpdated, Notify, NotifyEvent,
    ProtocolMessage, SetCursor,
};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use super::{TreeNode, TreeSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub node_id: String,
    pub scroll_into_view: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorState {
    snapshot: Option<TreeSnapshot>,
    global_view_id: Option<u64>,
    instance_id: Option<String>,
    needs_full_refresh: bool,
    cursor: Option<Cursor>,
    import_result: Option<ImportResult>,
    export_result: Option<ExportResult>,
}

impl MirrorState {
    fn from_init(init: InitTree) -> Self {
        Self {
            snapshot: Some(TreeSnapshot::new(TreeNode::from_data(init.root_node))),
            global_view_id: Some(init.global_view_id),
            instance_id: Some(init.instance_id),
            ..Self::default()
        }
    }

    /// `None` until the first Init.
    pub fn snapshot(&self) -> Option<&TreeSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn root(&self) -> Option<&Arc<TreeNode>> {
        self.snapshot.as_ref().map(TreeSnapshot::root)
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn global_view_id(&self) -> Option<u64> {
        self.global_view_id
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn needs_full_refresh(&self) -> bool {
        self.needs_full_refresh
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn import_result(&self) -> Option<&ImportResult> {
        self.import_result.as_ref()
    }

    pub fn export_result(&self) -> Option<&ExportResult> {
        self.export_result.as_ref()
    }

    fn derive(self: &Arc<Self>, change: impl FnOnce(&mut MirrorState)) -> Arc<MirrorState> {
        let mut next = MirrorState::clone(self);
        change(&mut next);
        Arc::new(next)
    }

    fn with_root(self: &Arc<Self>, root: Arc<TreeNode>) -> Arc<MirrorState> {
        self.derive(|next| next.snapshot = Some(TreeSnapshot::new(root)))
    }
}

/// Why a patch could not be applied in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFault {
    #[error("node `{id}` is not in the mirrored tree")]
    UnknownNode { id: String },
    #[error("ancestry of `{id}` is broken at `{at}`")]
    BrokenAncestry { id: String, at: String },
    #[error("refusing to remove root node `{id}`")]
    RootRemoval { id: String },
    #[error("unrecognized notification `{event}` for `{id}`")]
    UnrecognizedEvent { id: String, event: String },
}

pub fn reduce(prev: &Arc<MirrorState>, message: ProtocolMessage) -> Arc<MirrorState> {
    match message {
        ProtocolMessage::Init(init) => {
            debug!(
                target = "sync::reducer",
                view_id = init.global_view_id,
                instance = %init.instance_id,
                nodes = init.root_node.node_count(),
                "tree initialized"
            );
            Arc::new(MirrorState::from_init(init))
        }
        ProtocolMessage::NodeUpdated(update) => node_updated(prev, update),
        ProtocolMessage::Notify(notify) => notified(prev, notify),
        ProtocolMessage::SetCursor(SetCursor {
            target_id,
            do_not_scroll_view,
        }) => prev.derive(|next| {
            next.cursor = Some(Cursor {
                node_id: target_id,
                scroll_into_view: !do_not_scroll_view,
            })
        }),
        ProtocolMessage::ImportResult(result) => {
            prev.derive(|next| next.import_result = Some(result))
        }
        ProtocolMessage::ExportResult(result) => {
            prev.derive(|next| next.export_result = Some(result))
        }
        ProtocolMessage::Heartbeat => Arc::clone(prev),
    }
}

fn node_updated(prev: &Arc<MirrorState>, update: NodeUpdated) -> Arc<MirrorState> {
    let NodeUpdated {
        id,
        model_data_copy: data,
    } = update;
    let Some(snapshot) = prev.snapshot() else {
        return desync(prev, SyncFault::UnknownNode { id });
    };
    let Some(current) = snapshot.node(&id) else {
        return desync(prev, SyncFault::UnknownNode { id });
    };

    let replacement = Arc::new(patched_node(current, id.clone(), data));
    match splice(snapshot, &id, Some(replacement)) {
        Ok(root) => prev.with_root(root),
        Err(fault) => desync(prev, fault),
    }
}

/// Builds the replacement for `current`. Non-empty incoming children win;
/// an empty or missing list on a node marked as having children keeps the
/// children already mirrored.
fn patched_node(current: &TreeNode, id: String, data: NodeData) -> TreeNode {
    let NodeData {
        collapsed,
        has_children,
        subnodes,
        payload,
        ..
    } = data;
    let children = match subnodes {
        Some(list) if !list.is_empty() => {
            Some(list.into_iter().map(TreeNode::from_data).collect())
        }
        empty_or_absent => {
            let marked = has_children.unwrap_or_else(|| current.has_known_children());
            if marked {
                current.children.clone().or_else(|| Some(Vec::new()))
            } else {
                empty_or_absent.map(|_| Vec::new())
            }
        }
    };
    TreeNode {
        id,
        collapsed,
        children,
        payload,
    }
}

fn notified(prev: &Arc<MirrorState>, notify: Notify) -> Arc<MirrorState> {
    match notify.event() {
        NotifyEvent::NodeRemoved => node_removed(prev, notify.id),
        event @ (NotifyEvent::NodeMoved
        | NotifyEvent::NodeReplaced
        | NotifyEvent::ParentUpdated
        | NotifyEvent::WindowClosed) => {
            debug!(
                target = "sync::reducer",
                node = %notify.id,
                event = ?event,
                "structural change; full refresh required"
            );
            request_full_refresh(prev)
        }
        NotifyEvent::Unrecognized(event) => {
            let fault = SyncFault::UnrecognizedEvent {
                id: notify.id,
                event,
            };
            warn!(target = "sync::reducer", error = %fault, "full refresh required");
            request_full_refresh(prev)
        }
    }
}

fn node_removed(prev: &Arc<MirrorState>, id: String) -> Arc<MirrorState> {
    let Some(snapshot) = prev.snapshot() else {
        trace!(target = "sync::reducer", node = %id, "removal before init ignored");
        return Arc::clone(prev);
    };
    if snapshot.root().id == id {
        let fault = SyncFault::RootRemoval { id };
        error!(
            target = "sync::reducer",
            error = %fault,
            "protocol invariant violated; state kept"
        );
        return Arc::clone(prev);
    }
    if !snapshot.contains(&id) {
        trace!(target = "sync::reducer", node = %id, "removal of absent node ignored");
        return Arc::clone(prev);
    }
    match splice(snapshot, &id, None) {
        Ok(root) => prev.with_root(root),
        Err(fault) => desync(prev, fault),
    }
}

/// Replaces (or with `None`, excises) `target` and clones every ancestor up
/// to the root. Returns the new root.
fn splice<'a>(
    snapshot: &'a TreeSnapshot,
    target: &'a str,
    replacement: Option<Arc<TreeNode>>,
) -> Result<Arc<TreeNode>, SyncFault> {
    let broken = |at: &str| SyncFault::BrokenAncestry {
        id: target.to_string(),
        at: at.to_string(),
    };
    let mut child_id = target;
    let mut replacement = replacement;
    for parent_id in snapshot.ancestors(target) {
        let parent = snapshot.node(parent_id).ok_or_else(|| broken(parent_id))?;
        let position = parent
            .child_position(child_id)
            .ok_or_else(|| broken(parent_id))?;
        let siblings = parent.children();

        let mut children = Vec::with_capacity(siblings.len());
        children.extend_from_slice(&siblings[..position]);
        children.extend(replacement.take());
        children.extend_from_slice(&siblings[position + 1..]);

        replacement = Some(Arc::new(parent.with_children(Some(children))));
        child_id = parent_id;
    }
    if child_id != snapshot.root().id {
        return Err(broken(child_id));
    }
    replacement.ok_or_else(|| SyncFault::RootRemoval {
        id: child_id.to_string(),
    })
}

fn desync(prev: &Arc<MirrorState>, fault: SyncFault) -> Arc<MirrorState> {
    warn!(target = "sync::reducer", error = %fault, "patch impossible; full refresh required");
    request_full_refresh(prev)
}

fn request_full_refresh(prev: &Arc<MirrorState>) -> Arc<MirrorState> {
    prev.derive(|next| next.needs_full_refresh = true)
}

/// Holds the current mirror and folds messages into it.
#[derive(Debug, Default)]
pub struct TreeSyncReducer {
    state: Arc<MirrorState>,
}

impl TreeSyncReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: ProtocolMessage) -> &Arc<MirrorState> {
        self.state = reduce(&self.state, message);
        &self.state
    }

    pub fn state(&self) -> &Arc<MirrorState> {
        &self.state
    }

    /// Back to uninitialized.
    pub fn reset(&mut self) {
        self.state = Arc::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tab(id: &str, title: &str) -> NodeData {
        NodeData::leaf(id).with_field("title", json!(title))
    }

    fn sample_tree() -> NodeData {
        NodeData::container(
            "root",
            vec![
                NodeData::container("win_A", vec![tab("t1", "one"), tab("t2", "two")]),
                NodeData::container("win_B", vec![tab("t3", "three")]).with_collapsed(true),
            ],
        )
    }

    fn init(reducer: &mut TreeSyncReducer) -> Arc<MirrorState> {
        Arc::clone(reducer.apply(ProtocolMessage::Init(InitTree {
            root_node: sample_tree(),
            global_view_id: 7,
            instance_id: "inst-1".into(),
        })))
    }

    fn updated(id: &str, data: NodeData) -> ProtocolMessage {
        ProtocolMessage::NodeUpdated(NodeUpdated {
            id: id.into(),
            model_data_copy: data,
        })
    }

    fn removed(id: &str) -> ProtocolMessage {
        ProtocolMessage::Notify(Notify::new(id, NotifyEvent::NODE_REMOVED))
    }

    fn assert_parent_index_consistent(state: &MirrorState) {
        let snapshot = state.snapshot().unwrap();
        let mut stack = vec![Arc::clone(snapshot.root())];
        let mut seen = 1;
        while let Some(node) = stack.pop() {
            for child in node.children() {
                assert_eq!(snapshot.parent_id(&child.id), Some(node.id.as_str()));
                assert!(Arc::ptr_eq(snapshot.node(&child.id).unwrap(), child));
                seen += 1;
                stack.push(Arc::clone(child));
            }
        }
        assert_eq!(seen, snapshot.len());
    }

    #[test]
    fn init_makes_state_ready() {
        let mut reducer = TreeSyncReducer::new();
        assert!(!reducer.state().is_ready());
        let state = init(&mut reducer);
        assert!(state.is_ready());
        assert_eq!(state.global_view_id(), Some(7));
        assert_eq!(state.instance_id(), Some("inst-1"));
        assert!(!state.needs_full_refresh());
        assert_eq!(state.snapshot().unwrap().len(), 6);
    }

    #[test]
    fn identical_update_copies_path_and_shares_siblings() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        let after = Arc::clone(reducer.apply(updated("t1", tab("t1", "one"))));

        let old_root = before.root().unwrap();
        let new_root = after.root().unwrap();
        assert_eq!(old_root, new_root);
        assert!(!Arc::ptr_eq(old_root, new_root));
        assert!(!Arc::ptr_eq(&old_root.children()[0], &new_root.children()[0]));
        assert!(Arc::ptr_eq(&old_root.children()[1], &new_root.children()[1]));
        assert!(Arc::ptr_eq(
            &old_root.children()[0].children()[1],
            &new_root.children()[0].children()[1]
        ));
        assert_parent_index_consistent(&after);
    }

    #[test]
    fn update_replaces_payload_and_flags() {
        let mut reducer = TreeSyncReducer::new();
        init(&mut reducer);
        let state = reducer.apply(updated("t3", tab("t3", "renamed").with_collapsed(true)));
        let node = state.snapshot().unwrap().node("t3").unwrap();
        assert_eq!(node.title(), Some("renamed"));
        assert!(node.collapsed);
        assert!(node.is_leaf());
    }

    #[test]
    fn empty_children_on_known_parent_preserve_subtree() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        let old_children = before.snapshot().unwrap().node("win_A").unwrap().children().to_vec();

        let after = reducer.apply(updated(
            "win_A",
            NodeData::container("win_A", Vec::new()).with_collapsed(true),
        ));
        let node = after.snapshot().unwrap().node("win_A").unwrap();
        assert!(node.collapsed);
        assert_eq!(node.children().len(), 2);
        for (old, new) in old_children.iter().zip(node.children()) {
            assert!(Arc::ptr_eq(old, new));
        }
    }

    #[test]
    fn absent_children_with_has_children_flag_preserve_subtree() {
        let mut reducer = TreeSyncReducer::new();
        init(&mut reducer);
        let state = reducer.apply(updated(
            "win_B",
            NodeData::leaf("win_B").with_has_children(true),
        ));
        assert_eq!(
            state.snapshot().unwrap().node("win_B").unwrap().children().len(),
            1
        );
    }

    #[test]
    fn explicit_no_children_flag_empties_node() {
        let mut reducer = TreeSyncReducer::new();
        init(&mut reducer);
        let state = reducer.apply(updated(
            "win_A",
            NodeData::container("win_A", Vec::new()).with_has_children(false),
        ));
        let snapshot = state.snapshot().unwrap();
        let node = snapshot.node("win_A").unwrap();
        assert!(!node.is_leaf());
        assert!(node.children().is_empty());
        assert!(!snapshot.contains("t1"));
        assert_parent_index_consistent(state);
    }

    #[test]
    fn non_empty_children_are_authoritative() {
        let mut reducer = TreeSyncReducer::new();
        init(&mut reducer);
        let state = reducer.apply(updated(
            "win_B",
            NodeData::container("win_B", vec![tab("t4", "four"), tab("t5", "five")]),
        ));
        let snapshot = state.snapshot().unwrap();
        assert!(!snapshot.contains("t3"));
        assert_eq!(snapshot.parent_id("t5"), Some("win_B"));
        assert_parent_index_consistent(state);
    }

    #[test]
    fn unknown_update_requests_refresh_and_keeps_root() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        let after = reducer.apply(updated("new-tab-5", tab("new-tab-5", "five")));
        assert!(after.needs_full_refresh());
        assert!(Arc::ptr_eq(before.root().unwrap(), after.root().unwrap()));
    }

    #[test]
    fn update_before_init_requests_refresh() {
        let mut reducer = TreeSyncReducer::new();
        let state = reducer.apply(updated("t1", tab("t1", "one")));
        assert!(state.needs_full_refresh());
        assert!(!state.is_ready());
    }

    #[test]
    fn removing_absent_node_returns_same_state() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        let after = reducer.apply(removed("ghost"));
        assert!(Arc::ptr_eq(&before, after));
    }

    #[test]
    fn removing_root_is_refused() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        let after = reducer.apply(removed("root"));
        assert!(Arc::ptr_eq(&before, after));
    }

    #[test]
    fn removing_node_excises_it_and_shares_siblings() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        let after = Arc::clone(reducer.apply(removed("t1")));

        let snapshot = after.snapshot().unwrap();
        assert!(!snapshot.contains("t1"));
        let win_a = snapshot.node("win_A").unwrap();
        assert_eq!(win_a.children().len(), 1);
        assert!(Arc::ptr_eq(
            &win_a.children()[0],
            before.snapshot().unwrap().node("t2").unwrap()
        ));
        assert!(Arc::ptr_eq(
            snapshot.node("win_B").unwrap(),
            before.snapshot().unwrap().node("win_B").unwrap()
        ));
        assert_parent_index_consistent(&after);
    }

    #[test]
    fn removing_subtree_drops_descendants_from_index() {
        let mut reducer = TreeSyncReducer::new();
        init(&mut reducer);
        let state = reducer.apply(removed("win_A"));
        let snapshot = state.snapshot().unwrap();
        assert!(!snapshot.contains("t1"));
        assert!(!snapshot.contains("t2"));
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn structural_and_unknown_events_request_refresh() {
        for event in [
            NotifyEvent::NODE_MOVED,
            NotifyEvent::NODE_REPLACED,
            NotifyEvent::PARENT_UPDATED,
            NotifyEvent::WINDOW_CLOSED,
            "onSomethingNew",
        ] {
            let mut reducer = TreeSyncReducer::new();
            let before = init(&mut reducer);
            let after = reducer.apply(ProtocolMessage::Notify(Notify::new("t1", event)));
            assert!(after.needs_full_refresh(), "{event}");
            assert!(Arc::ptr_eq(before.root().unwrap(), after.root().unwrap()));
        }
    }

    #[test]
    fn cursor_and_results_are_cleared_by_init() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        reducer.apply(ProtocolMessage::SetCursor(SetCursor {
            target_id: "t2".into(),
            do_not_scroll_view: true,
        }));
        reducer.apply(ProtocolMessage::ImportResult(ImportResult {
            success: true,
            node_count: 3,
            error: None,
        }));
        let state = reducer.apply(ProtocolMessage::ExportResult(ExportResult {
            success: false,
            tree_json: None,
            error: Some("quota".into()),
        }));
        assert_eq!(
            state.cursor(),
            Some(&Cursor {
                node_id: "t2".into(),
                scroll_into_view: false
            })
        );
        assert_eq!(state.import_result().map(|r| r.node_count), Some(3));
        assert_eq!(
            state.export_result().and_then(|r| r.error.as_deref()),
            Some("quota")
        );
        assert!(Arc::ptr_eq(before.root().unwrap(), state.root().unwrap()));

        reducer.apply(updated("ghost", NodeData::leaf("ghost")));
        let state = init(&mut reducer);
        assert!(state.cursor().is_none());
        assert!(state.import_result().is_none());
        assert!(state.export_result().is_none());
        assert!(!state.needs_full_refresh());
    }

    #[test]
    fn heartbeat_and_reset() {
        let mut reducer = TreeSyncReducer::new();
        let before = init(&mut reducer);
        assert!(Arc::ptr_eq(&before, reducer.apply(ProtocolMessage::Heartbeat)));
        reducer.reset();
        assert!(!reducer.state().is_ready());
    }
}
