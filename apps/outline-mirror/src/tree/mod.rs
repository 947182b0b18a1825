//! Foreground mirror of the background-owned tree.

pub mod adapter;
mod node;
pub mod reducer;
mod snapshot;

pub use adapter::{VisibleRow, build_open_map, find_node, renderable_children, visible_rows};
pub use node::TreeNode;
pub use reducer::{Cursor, MirrorState, SyncFault, TreeSyncReducer, reduce};
pub use snapshot::TreeSnapshot;
