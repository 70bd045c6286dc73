//! The central log, as seen from a device.

use crate::{error::TransportError, role::Role};
use async_trait::async_trait;
use futures::stream::BoxStream;
use lineage_engine::{Operation, SequenceNumber};

/// Stream of committed operations pushed by the central log.
pub type OperationStream = BoxStream<'static, Operation>;

/// Stream of role updates for the current user.
pub type RoleStream = BoxStream<'static, Role>;

/// Network access to the central operation log.
///
/// Implementations own authentication; the engine only hands over operations
/// that passed format validation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Commit a batch atomically. On success every operation comes back with
    /// its assigned sequence number, in batch order.
    async fn send_batch(&self, ops: Vec<Operation>) -> Result<Vec<Operation>, TransportError>;

    /// Every committed operation of a tree with a sequence number above
    /// `after`, in sequence order.
    async fn fetch_since(
        &self,
        tree_id: &str,
        after: SequenceNumber,
    ) -> Result<Vec<Operation>, TransportError>;

    /// Realtime push of newly committed operations. Dropping the stream
    /// unsubscribes.
    async fn subscribe(&self, tree_id: &str) -> Result<OperationStream, TransportError>;

    /// Realtime updates of the caller's role on a tree.
    async fn subscribe_to_role(&self, tree_id: &str) -> Result<RoleStream, TransportError>;
}
