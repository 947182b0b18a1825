//! Tree persistence over a key-value store, plus the one-time move off the
//! legacy storage format.

use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::sync::Arc;

use outline_proto::NodeData;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tree::TreeNode;

pub const TREE_KEY: &str = "outline.tree";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("value under `{key}` is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize tree: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().contains_key(key))
    }
}

/// The tree document, stored as `NodeData` JSON under [`TREE_KEY`].
pub struct TreeStore<S> {
    kv: S,
}

impl<S: KeyValueStore> TreeStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn backend(&self) -> &S {
        &self.kv
    }

    pub fn tree_exists(&self) -> StoreResult<bool> {
        self.kv.contains(TREE_KEY)
    }

    pub fn load_tree(&self) -> StoreResult<Option<Arc<TreeNode>>> {
        let Some(value) = self.kv.get(TREE_KEY)? else {
            return Ok(None);
        };
        let data: NodeData = serde_json::from_value(value).map_err(|source| StoreError::Corrupt {
            key: TREE_KEY.to_string(),
            source,
        })?;
        Ok(Some(TreeNode::from_data(data)))
    }

    pub fn save_tree(&self, root: &TreeNode) -> StoreResult<()> {
        let value = serde_json::to_value(root.to_data())?;
        self.kv.set(TREE_KEY, value)?;
        debug!(target = "store::tree", root = %root.id, "tree saved");
        Ok(())
    }
}

pub type LegacyError = Box<dyn StdError + Send + Sync>;

/// Reads the pre-migration tree. Parsing the legacy format lives with the
/// implementor.
pub trait LegacySource {
    fn read_legacy(&self) -> Result<Option<NodeData>, LegacyError>;
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("legacy source failed: {0}")]
    Source(#[source] LegacyError),
    #[error("legacy tree root has no id")]
    EmptyRootId,
    #[error("legacy tree repeats node id `{0}`")]
    DuplicateId(String),
    #[error("stored tree does not match the migrated tree")]
    VerificationFailed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyMigrated,
    NothingToMigrate,
    Migrated { node_count: usize },
}

pub fn migrate_legacy<S: KeyValueStore>(
    source: &dyn LegacySource,
    store: &TreeStore<S>,
) -> Result<MigrationOutcome, MigrationError> {
    if store.tree_exists()? {
        debug!(target = "store::migrate", "tree already present; migration skipped");
        return Ok(MigrationOutcome::AlreadyMigrated);
    }
    let Some(legacy) = source.read_legacy().map_err(MigrationError::Source)? else {
        debug!(target = "store::migrate", "no legacy tree found");
        return Ok(MigrationOutcome::NothingToMigrate);
    };

    let node_count = validate(&legacy)?;
    let root = TreeNode::from_data(legacy);
    store.save_tree(&root)?;

    match store.load_tree()? {
        Some(reloaded) if *reloaded == *root => {
            info!(target = "store::migrate", node_count, "legacy tree migrated");
            Ok(MigrationOutcome::Migrated { node_count })
        }
        _ => {
            warn!(target = "store::migrate", node_count, "migrated tree failed verification");
            Err(MigrationError::VerificationFailed)
        }
    }
}

fn validate(root: &NodeData) -> Result<usize, MigrationError> {
    if root.id.trim().is_empty() {
        return Err(MigrationError::EmptyRootId);
    }
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id.as_str()) {
            return Err(MigrationError::DuplicateId(node.id.clone()));
        }
        stack.extend(node.subnodes.iter().flatten());
    }
    Ok(seen.len())
}
