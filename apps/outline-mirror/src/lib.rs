//! Foreground side of a background-owned outline: a reconnecting channel,
//! a structural-sharing tree mirror and the per-view session tying them
//! together.

pub mod channel;
pub mod cli;
pub mod config;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod tree;

pub use channel::{ChannelState, ConnectionManager, Subscription};
pub use config::ConnectionConfig;
pub use session::ViewSession;
pub use tree::{MirrorState, TreeNode, TreeSnapshot, TreeSyncReducer};
