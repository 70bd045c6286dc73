//! Local durable storage consumed by the engine.
//!
//! Outgoing operations are persisted here before they touch the network, and
//! the confirmed graph is checkpointed here together with its cursor.

use crate::error::StorageError;
use async_trait::async_trait;
use lineage_engine::{LocalId, PendingOperation, TreeSnapshot};

/// Key-value/queue persistence for one device.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Persist a pending entry and return its storage handle.
    async fn save(&self, entry: &PendingOperation) -> Result<LocalId, StorageError>;

    /// Every persisted entry of a tree, in the order it was saved.
    async fn list_pending(&self, tree_id: &str) -> Result<Vec<PendingOperation>, StorageError>;

    /// Remove entries by handle. Unknown handles are ignored.
    async fn bulk_delete(&self, local_ids: &[LocalId]) -> Result<(), StorageError>;

    /// Store a full checkpoint of a tree.
    async fn save_snapshot(&self, snapshot: &TreeSnapshot) -> Result<(), StorageError>;

    /// Store a cheap checkpoint of a tree between full snapshots.
    async fn save_incremental(&self, snapshot: &TreeSnapshot) -> Result<(), StorageError>;

    /// The latest checkpoint of a tree, if any.
    async fn load_snapshot(&self, tree_id: &str) -> Result<Option<TreeSnapshot>, StorageError>;
}
