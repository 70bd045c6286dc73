//! Durable queue kept in process memory.
//!
//! Entries and snapshots are stored serialized, the way a key-value store on
//! the device would hold them.

use crate::{error::StorageError, storage::DurableQueue};
use async_trait::async_trait;
use dashmap::DashMap;
use lineage_engine::{LocalId, PendingOperation, TreeId, TreeSnapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct StoredEntry {
    /// Save order
    ordinal: u64,
    tree_id: TreeId,
    json: String,
}

/// [`DurableQueue`] backed by concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: DashMap<LocalId, StoredEntry>,
    next_ordinal: AtomicU64,
    snapshots: DashMap<TreeId, String>,
    full_saves: AtomicUsize,
    incremental_saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new queue wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of persisted entries across all trees.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persisted entries of a tree, in save order.
    pub fn pending(&self, tree_id: &str) -> Vec<PendingOperation> {
        let mut stored: Vec<(u64, PendingOperation)> = self
            .entries
            .iter()
            .filter(|e| e.tree_id == tree_id)
            .filter_map(|e| serde_json::from_str(&e.json).ok().map(|p| (e.ordinal, p)))
            .collect();
        stored.sort_by_key(|(ordinal, _)| *ordinal);
        stored.into_iter().map(|(_, p)| p).collect()
    }

    /// Latest checkpoint of a tree, full or incremental.
    pub fn snapshot(&self, tree_id: &str) -> Option<TreeSnapshot> {
        let json = self.snapshots.get(tree_id)?;
        TreeSnapshot::from_json(&json).ok()
    }

    pub fn full_saves(&self) -> usize {
        self.full_saves.load(Ordering::SeqCst)
    }

    pub fn incremental_saves(&self) -> usize {
        self.incremental_saves.load(Ordering::SeqCst)
    }

    /// Make every write fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    fn store_snapshot(&self, snapshot: &TreeSnapshot) -> Result<(), StorageError> {
        self.check_writable()?;
        let json = snapshot
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.snapshots.insert(snapshot.tree_id.clone(), json);
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn save(&self, entry: &PendingOperation) -> Result<LocalId, StorageError> {
        self.check_writable()?;

        let local_id = uuid::Uuid::new_v4().to_string();
        let stored = entry.clone().with_local_id(local_id.clone());
        let json = serde_json::to_string(&stored)?;

        self.entries.insert(
            local_id.clone(),
            StoredEntry {
                ordinal: self.next_ordinal.fetch_add(1, Ordering::SeqCst),
                tree_id: stored.operation.tree_id.clone(),
                json,
            },
        );

        Ok(local_id)
    }

    async fn list_pending(&self, tree_id: &str) -> Result<Vec<PendingOperation>, StorageError> {
        let mut stored: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|e| e.tree_id == tree_id)
            .map(|e| (e.ordinal, e.json.clone()))
            .collect();
        stored.sort_by_key(|(ordinal, _)| *ordinal);

        stored
            .into_iter()
            .map(|(_, json)| serde_json::from_str(&json).map_err(StorageError::from))
            .collect()
    }

    async fn bulk_delete(&self, local_ids: &[LocalId]) -> Result<(), StorageError> {
        self.check_writable()?;
        for id in local_ids {
            self.entries.remove(id);
        }
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &TreeSnapshot) -> Result<(), StorageError> {
        self.store_snapshot(snapshot)?;
        self.full_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_incremental(&self, snapshot: &TreeSnapshot) -> Result<(), StorageError> {
        self.store_snapshot(snapshot)?;
        self.incremental_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_snapshot(&self, tree_id: &str) -> Result<Option<TreeSnapshot>, StorageError> {
        match self.snapshots.get(tree_id) {
            Some(json) => TreeSnapshot::from_json(&json)
                .map(Some)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}
