//! Snapshot types for persisting and restoring a tree.
//!
//! A snapshot pairs the confirmed graph with the sync cursor it was built at,
//! so a restart resumes catch-up from exactly where it left off. Serialization
//! is deterministic: the graph is BTreeMap-backed.

use crate::{error::Result, Error, Graph, SequenceNumber, TreeId};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of one tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Tree the graph belongs to
    pub tree_id: TreeId,
    /// Sync cursor: the highest sequence number folded into `graph`
    pub last_applied_sequence: SequenceNumber,
    /// Confirmed graph at the cursor
    pub graph: Graph,
}

impl TreeSnapshot {
    pub fn new(tree_id: impl Into<TreeId>, last_applied_sequence: SequenceNumber, graph: Graph) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tree_id: tree_id.into(),
            last_applied_sequence,
            graph,
        }
    }

    /// An empty tree at the initial cursor.
    pub fn empty(tree_id: impl Into<TreeId>) -> Self {
        Self::new(tree_id, 0, Graph::new())
    }

    /// Check the snapshot can be loaded for `tree_id`.
    pub fn validate_for(&self, tree_id: &str) -> Result<()> {
        if self.tree_id != tree_id {
            return Err(Error::TreeMismatch {
                expected: tree_id.to_string(),
                actual: self.tree_id.clone(),
            });
        }
        if let Some(violation) = self.graph.check_consistency().into_iter().next() {
            return Err(Error::InvalidSnapshot(format!(
                "inconsistent graph: {violation:?}"
            )));
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
