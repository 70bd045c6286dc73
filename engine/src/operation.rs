//! Operation types for expressing changes to the graph.
//!
//! Changes are expressed as operations, not direct mutations. The same
//! operation is applied optimistically on the device that created it, queued
//! until the central log commits it, and replayed on every other device once it
//! comes back with a sequence number.

use crate::{
    entity::{Entity, RelationKind, RelationshipMeta},
    AuthorId, EntityId, LocalId, SequenceNumber, Timestamp, TreeId,
};
use serde::{Deserialize, Serialize};

/// Payload of `ADD_NODE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNode {
    /// The entity to insert
    pub entity: Entity,
    /// Relative the new entity is attached to (usually the focused person)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<EntityId>,
    /// What the new entity is to `related_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_kind: Option<RelationKind>,
}

/// Payload of `UPDATE_PROP`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProp {
    /// Entity to update
    pub id: EntityId,
    /// Scalar fields to merge
    pub updates: serde_json::Map<String, serde_json::Value>,
}

/// Payload of `ADD_RELATION` and `DELETE_RELATION`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationChange {
    pub id_a: EntityId,
    pub id_b: EntityId,
    /// What B is to A
    pub kind: RelationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RelationshipMeta>,
}

/// Payload of `DELETE_NODE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNode {
    pub id: EntityId,
}

/// The typed mutation carried by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Change {
    AddNode(AddNode),
    UpdateProp(UpdateProp),
    AddRelation(RelationChange),
    DeleteRelation(RelationChange),
    DeleteNode(DeleteNode),
}

impl Change {
    /// Insert a standalone entity.
    pub fn add_node(entity: Entity) -> Self {
        Change::AddNode(AddNode {
            entity,
            related_id: None,
            relation_kind: None,
        })
    }

    /// Insert an entity and attach it to a relative. `kind` is what the new
    /// entity is to `related_id`.
    pub fn add_related_node(
        entity: Entity,
        related_id: impl Into<EntityId>,
        kind: RelationKind,
    ) -> Self {
        Change::AddNode(AddNode {
            entity,
            related_id: Some(related_id.into()),
            relation_kind: Some(kind),
        })
    }

    /// Merge scalar fields. Non-object `updates` merge nothing.
    pub fn update_prop(id: impl Into<EntityId>, updates: serde_json::Value) -> Self {
        let updates = match updates {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Change::UpdateProp(UpdateProp {
            id: id.into(),
            updates,
        })
    }

    pub fn add_relation(
        id_a: impl Into<EntityId>,
        id_b: impl Into<EntityId>,
        kind: RelationKind,
    ) -> Self {
        Change::AddRelation(RelationChange {
            id_a: id_a.into(),
            id_b: id_b.into(),
            kind,
            metadata: None,
        })
    }

    /// Add a relation carrying pairwise metadata (e.g. a marriage date).
    pub fn add_relation_with(
        id_a: impl Into<EntityId>,
        id_b: impl Into<EntityId>,
        kind: RelationKind,
        metadata: RelationshipMeta,
    ) -> Self {
        Change::AddRelation(RelationChange {
            id_a: id_a.into(),
            id_b: id_b.into(),
            kind,
            metadata: Some(metadata),
        })
    }

    pub fn delete_relation(
        id_a: impl Into<EntityId>,
        id_b: impl Into<EntityId>,
        kind: RelationKind,
    ) -> Self {
        Change::DeleteRelation(RelationChange {
            id_a: id_a.into(),
            id_b: id_b.into(),
            kind,
            metadata: None,
        })
    }

    pub fn delete_node(id: impl Into<EntityId>) -> Self {
        Change::DeleteNode(DeleteNode { id: id.into() })
    }

    /// Wire name of the change type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Change::AddNode(_) => "ADD_NODE",
            Change::UpdateProp(_) => "UPDATE_PROP",
            Change::AddRelation(_) => "ADD_RELATION",
            Change::DeleteRelation(_) => "DELETE_RELATION",
            Change::DeleteNode(_) => "DELETE_NODE",
        }
    }

    /// The entity the change is about; this is the id that gets the
    /// "syncing" marker while the change is in flight.
    pub fn target_id(&self) -> &EntityId {
        match self {
            Change::AddNode(c) => &c.entity.id,
            Change::UpdateProp(c) => &c.id,
            Change::AddRelation(c) | Change::DeleteRelation(c) => &c.id_a,
            Change::DeleteNode(c) => &c.id,
        }
    }

    /// Every entity id embedded in the payload.
    pub fn entity_ids(&self) -> Vec<&EntityId> {
        match self {
            Change::AddNode(c) => {
                let mut ids = vec![&c.entity.id];
                ids.extend(c.related_id.iter());
                ids.extend(c.entity.links().map(|(_, id)| id));
                ids
            }
            Change::UpdateProp(c) => vec![&c.id],
            Change::AddRelation(c) | Change::DeleteRelation(c) => vec![&c.id_a, &c.id_b],
            Change::DeleteNode(c) => vec![&c.id],
        }
    }
}

/// A single mutation of one tree, as stored in the central log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Tree the operation belongs to
    pub tree_id: TreeId,
    /// User who authored the operation
    pub author_id: AuthorId,
    /// Type tag and payload
    #[serde(flatten)]
    pub change: Change,
    /// Assigned by the central log on commit; strictly increasing per tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<SequenceNumber>,
    /// When the operation was authored (milliseconds since epoch)
    pub created_at: Timestamp,
}

impl Operation {
    /// Create an uncommitted operation.
    pub fn new(
        tree_id: impl Into<TreeId>,
        author_id: impl Into<AuthorId>,
        change: Change,
        created_at: Timestamp,
    ) -> Self {
        Self {
            tree_id: tree_id.into(),
            author_id: author_id.into(),
            change,
            sequence_number: None,
            created_at,
        }
    }

    /// Builder-style method to stamp a sequence number.
    pub fn with_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.sequence_number = Some(sequence);
        self
    }

    /// Whether the central log has committed this operation.
    pub fn is_committed(&self) -> bool {
        self.sequence_number.is_some()
    }

    /// See [`Change::target_id`].
    pub fn target_id(&self) -> &EntityId {
        self.change.target_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.change.type_name()
    }
}

/// An operation waiting in the outgoing queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Handle into durable storage, assigned when the entry is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    /// The operation
    pub operation: Operation,
    /// Failed send attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Local monotonic counter for UI bookkeeping; never used for ordering
    pub client_version: u64,
}

impl PendingOperation {
    pub fn new(operation: Operation, client_version: u64) -> Self {
        Self {
            local_id: None,
            operation,
            retry_count: 0,
            client_version,
        }
    }

    pub fn with_local_id(mut self, local_id: impl Into<LocalId>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }
}
