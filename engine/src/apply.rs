//! Apply - folding operations into the graph.
//!
//! The same code path serves local optimistic application, remote replay and
//! recovery replay. Every change validates before it mutates, so a rejected
//! change leaves the graph exactly as it was.

use crate::{
    entity::{is_reserved_field, Entity},
    error::Result,
    operation::{AddNode, Change, DeleteNode, RelationChange, UpdateProp},
    validate::is_valid_entity_id,
    EntityId, Error, Graph, Operation, RelationKind, SequenceNumber,
};

/// Apply one operation to a graph.
///
/// Returns the new graph, or `None` when the operation cannot be applied.
/// The input graph is never modified.
pub fn apply(graph: &Graph, op: &Operation) -> Option<Graph> {
    let mut next = graph.clone();
    next.try_apply(&op.change).ok()?;
    Some(next)
}

/// An operation rejected during [`apply_sequential`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Sequence number of the rejected operation, if committed
    pub sequence: Option<SequenceNumber>,
    /// Wire type of the rejected operation
    pub type_name: &'static str,
    pub error: Error,
}

/// Result of folding a batch of operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SequentialOutcome {
    /// The graph after every applicable operation
    pub graph: Graph,
    /// Highest sequence number seen in the batch, applied or not
    pub max_sequence: Option<SequenceNumber>,
    /// Number of operations applied
    pub applied: usize,
    pub rejected: Vec<Rejection>,
}

/// Fold operations in order onto one working copy of `graph`.
///
/// A rejected operation is recorded and skipped; it never affects the working
/// copy or the operations after it.
pub fn apply_sequential<'a, I>(graph: &Graph, ops: I) -> SequentialOutcome
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut outcome = SequentialOutcome {
        graph: graph.clone(),
        max_sequence: None,
        applied: 0,
        rejected: Vec::new(),
    };

    for op in ops {
        if let Some(seq) = op.sequence_number {
            outcome.max_sequence = Some(outcome.max_sequence.map_or(seq, |max| max.max(seq)));
        }
        match outcome.graph.try_apply(&op.change) {
            Ok(()) => outcome.applied += 1,
            Err(error) => outcome.rejected.push(Rejection {
                sequence: op.sequence_number,
                type_name: op.type_name(),
                error,
            }),
        }
    }

    outcome
}

impl Graph {
    /// Apply a change in place.
    ///
    /// On error the graph is unchanged.
    pub fn try_apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::AddNode(c) => self.add_node(c),
            Change::UpdateProp(c) => self.update_prop(c),
            Change::AddRelation(c) => self.add_relation(c),
            Change::DeleteRelation(c) => {
                self.delete_relation(c);
                Ok(())
            }
            Change::DeleteNode(c) => {
                self.delete_node(c);
                Ok(())
            }
        }
    }

    fn add_node(&mut self, change: &AddNode) -> Result<()> {
        let incoming = &change.entity;
        if !is_valid_entity_id(&incoming.id) {
            return Err(Error::InvalidEntityId(incoming.id.clone()));
        }
        let id = incoming.id.clone();

        // Re-adding keeps the links already wired and replaces the scalars.
        let mut node = self.remove(&id).unwrap_or_else(|| Entity::new(id.clone()));
        node.fields = incoming
            .fields
            .iter()
            .filter(|(key, _)| !is_reserved_field(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let related = match (&change.related_id, change.relation_kind) {
            // The new entity is `kind` to the relative, so the relative is the
            // inverse kind to the new entity.
            (Some(related), Some(kind)) => Some((kind.inverse(), related)),
            _ => None,
        };
        for (kind, other) in related.into_iter().chain(incoming.links()) {
            self.wire(&mut node, kind, other);
        }

        for (other, meta) in &incoming.relationships {
            if !node.references(other) {
                continue;
            }
            node.relationships.insert(other.clone(), meta.clone());
            if let Some(target) = self.get_mut(other) {
                target.relationships.insert(id.clone(), meta.clone());
            }
        }

        self.insert(node);
        Ok(())
    }

    /// Link a detached `node` to `other` under `kind`, with the inverse edge.
    /// Links to absent entities or past the parent limit are dropped.
    fn wire(&mut self, node: &mut Entity, kind: RelationKind, other: &EntityId) {
        if other == &node.id || node.relations(kind).contains(other) || !self.contains(other) {
            return;
        }
        let full = match kind {
            RelationKind::Parent => node.parents.len() >= crate::graph::MAX_PARENTS,
            RelationKind::Child => self.parent_slot_taken(other, &node.id),
            RelationKind::Spouse => false,
        };
        if full {
            return;
        }
        if let Some(target) = self.get_mut(other) {
            target.relations_mut(kind.inverse()).insert(node.id.clone());
            node.relations_mut(kind).insert(other.clone());
        }
    }

    fn update_prop(&mut self, change: &UpdateProp) -> Result<()> {
        let entity = self
            .get_mut(&change.id)
            .ok_or_else(|| Error::EntityNotFound(change.id.clone()))?;

        for (key, value) in &change.updates {
            if !is_reserved_field(key) {
                entity.fields.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn add_relation(&mut self, change: &RelationChange) -> Result<()> {
        let (a, b, kind) = (&change.id_a, &change.id_b, change.kind);

        if a == b {
            return Err(Error::SelfRelation(a.clone()));
        }
        for id in [a, b] {
            if !self.contains(id) {
                return Err(Error::EntityNotFound(id.clone()));
            }
        }
        match kind {
            RelationKind::Parent if self.parent_slot_taken(a, b) => {
                return Err(Error::ParentLimitReached(a.clone()))
            }
            RelationKind::Child if self.parent_slot_taken(b, a) => {
                return Err(Error::ParentLimitReached(b.clone()))
            }
            _ => {}
        }

        // Both endpoints exist, checked above.
        if let Some(entity) = self.get_mut(a) {
            entity.relations_mut(kind).insert(b.clone());
            if let Some(meta) = &change.metadata {
                entity.relationships.insert(b.clone(), meta.clone());
            }
        }
        if let Some(entity) = self.get_mut(b) {
            entity.relations_mut(kind.inverse()).insert(a.clone());
            if let Some(meta) = &change.metadata {
                entity.relationships.insert(a.clone(), meta.clone());
            }
        }
        Ok(())
    }

    fn delete_relation(&mut self, change: &RelationChange) {
        let (a, b, kind) = (&change.id_a, &change.id_b, change.kind);

        if let Some(entity) = self.get_mut(a) {
            entity.relations_mut(kind).remove(b);
            entity.relationships.remove(b);
        }
        if let Some(entity) = self.get_mut(b) {
            entity.relations_mut(kind.inverse()).remove(a);
            entity.relationships.remove(a);
        }
    }

    fn delete_node(&mut self, change: &DeleteNode) {
        self.remove(&change.id);
        for entity in self.entities_mut() {
            entity.forget(&change.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelationshipMeta;
    use serde_json::json;

    const TREE: &str = "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f";

    fn op(change: Change) -> Operation {
        Operation::new(TREE, "alice", change, 1_000)
    }

    fn graph_with(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for id in ids {
            graph
                .try_apply(&Change::add_node(Entity::new(*id)))
                .unwrap();
        }
        graph
    }

    #[test]
    fn add_node_inserts_fields() {
        let entity = Entity::new("p1").with_field("firstName", json!("Ada"));
        let graph = apply(&Graph::new(), &op(Change::add_node(entity))).unwrap();

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get("p1").unwrap().field("firstName"), Some(&json!("Ada")));
    }

    #[test]
    fn add_node_rejects_bad_ids() {
        assert!(apply(&Graph::new(), &op(Change::add_node(Entity::new("")))).is_none());
        assert!(apply(&Graph::new(), &op(Change::add_node(Entity::new("a b")))).is_none());
    }

    #[test]
    fn add_related_node_wires_inverse() {
        let graph = graph_with(&["p1"]);
        // p2 is a parent of p1
        let change = Change::add_related_node(Entity::new("p2"), "p1", RelationKind::Parent);
        let graph = apply(&graph, &op(change)).unwrap();

        assert!(graph.get("p1").unwrap().parents.contains("p2"));
        assert!(graph.get("p2").unwrap().children.contains("p1"));
        assert!(graph.is_consistent());
    }

    #[test]
    fn add_node_prunes_absent_links() {
        let graph = graph_with(&["p1"]);
        let entity = Entity::new("p2")
            .with_relation(RelationKind::Spouse, "p1")
            .with_relation(RelationKind::Child, "ghost");
        let graph = apply(&graph, &op(Change::add_node(entity))).unwrap();

        let p2 = graph.get("p2").unwrap();
        assert!(p2.spouses.contains("p1"));
        assert!(p2.children.is_empty());
        assert!(graph.get("p1").unwrap().spouses.contains("p2"));
        assert!(graph.is_consistent());
    }

    #[test]
    fn add_node_is_idempotent() {
        let graph = graph_with(&["p1"]);
        let change = Change::add_related_node(
            Entity::new("p2").with_field("lastName", json!("Byron")),
            "p1",
            RelationKind::Spouse,
        );

        let once = apply(&graph, &op(change.clone())).unwrap();
        let twice = apply(&once, &op(change)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn readd_replaces_scalars_keeps_links() {
        let graph = graph_with(&["p1"]);
        let graph = apply(
            &graph,
            &op(Change::add_related_node(
                Entity::new("p2").with_field("a", json!(1)),
                "p1",
                RelationKind::Child,
            )),
        )
        .unwrap();
        let graph = apply(
            &graph,
            &op(Change::add_node(Entity::new("p2").with_field("b", json!(2)))),
        )
        .unwrap();

        let p2 = graph.get("p2").unwrap();
        assert!(p2.field("a").is_none());
        assert_eq!(p2.field("b"), Some(&json!(2)));
        assert!(p2.parents.contains("p1"));
    }

    #[test]
    fn update_prop_merges_scalars_only() {
        let graph = graph_with(&["p1", "p2"]);
        let graph = apply(&graph, &op(Change::add_relation("p1", "p2", RelationKind::Spouse))).unwrap();

        let change = Change::update_prop(
            "p1",
            json!({"firstName": "X", "spouses": [], "note": null}),
        );
        let graph = apply(&graph, &op(change)).unwrap();

        let p1 = graph.get("p1").unwrap();
        assert_eq!(p1.field("firstName"), Some(&json!("X")));
        assert_eq!(p1.field("note"), Some(&json!(null)));
        assert!(p1.spouses.contains("p2"));
    }

    #[test]
    fn update_prop_on_missing_entity() {
        let change = Change::update_prop("nobody", json!({"firstName": "X"}));
        assert!(apply(&Graph::new(), &op(change)).is_none());
    }

    #[test]
    fn add_relation_directions() {
        let graph = graph_with(&["a", "b", "c"]);
        let graph = apply(&graph, &op(Change::add_relation("a", "b", RelationKind::Parent))).unwrap();
        let graph = apply(&graph, &op(Change::add_relation("a", "c", RelationKind::Child))).unwrap();

        assert!(graph.get("a").unwrap().parents.contains("b"));
        assert!(graph.get("b").unwrap().children.contains("a"));
        assert!(graph.get("a").unwrap().children.contains("c"));
        assert!(graph.get("c").unwrap().parents.contains("a"));
        assert!(graph.is_consistent());
    }

    #[test]
    fn add_relation_rejections() {
        let graph = graph_with(&["a", "b"]);
        assert!(apply(&graph, &op(Change::add_relation("a", "a", RelationKind::Spouse))).is_none());
        assert!(apply(&graph, &op(Change::add_relation("a", "z", RelationKind::Spouse))).is_none());
        assert_eq!(
            graph
                .clone()
                .try_apply(&Change::add_relation("z", "a", RelationKind::Child)),
            Err(Error::EntityNotFound("z".into()))
        );
    }

    #[test]
    fn two_parent_limit() {
        let mut graph = graph_with(&["c", "m", "f", "x"]);
        graph
            .try_apply(&Change::add_relation("c", "m", RelationKind::Parent))
            .unwrap();
        graph
            .try_apply(&Change::add_relation("f", "c", RelationKind::Child))
            .unwrap();

        let before = graph.clone();
        assert_eq!(
            graph.try_apply(&Change::add_relation("c", "x", RelationKind::Parent)),
            Err(Error::ParentLimitReached("c".into()))
        );
        assert_eq!(
            graph.try_apply(&Change::add_relation("x", "c", RelationKind::Child)),
            Err(Error::ParentLimitReached("c".into()))
        );
        assert_eq!(graph, before);

        // Re-adding an existing parent is not a third parent.
        assert!(graph
            .try_apply(&Change::add_relation("c", "m", RelationKind::Parent))
            .is_ok());
        assert_eq!(graph.get("c").unwrap().parents.len(), 2);
    }

    #[test]
    fn relation_metadata_on_both_ends() {
        let graph = graph_with(&["p1", "p2"]);
        let meta = RelationshipMeta::new("married").with_date("1901");
        let change = Change::add_relation_with("p1", "p2", RelationKind::Spouse, meta.clone());
        let graph = apply(&graph, &op(change)).unwrap();

        assert_eq!(graph.get("p1").unwrap().relationships.get("p2"), Some(&meta));
        assert_eq!(graph.get("p2").unwrap().relationships.get("p1"), Some(&meta));

        let graph = apply(&graph, &op(Change::delete_relation("p2", "p1", RelationKind::Spouse))).unwrap();
        assert!(graph.get("p1").unwrap().relationships.is_empty());
        assert!(graph.get("p2").unwrap().spouses.is_empty());
    }

    #[test]
    fn delete_relation_clears_metadata_for_any_kind() {
        let graph = graph_with(&["p1", "p2"]);
        let meta = RelationshipMeta::new("adoptive");
        let change = Change::add_relation_with("p1", "p2", RelationKind::Child, meta.clone());
        let graph = apply(&graph, &op(change)).unwrap();
        assert_eq!(graph.get("p2").unwrap().relationships.get("p1"), Some(&meta));

        let graph = apply(&graph, &op(Change::delete_relation("p1", "p2", RelationKind::Child))).unwrap();
        let (p1, p2) = (graph.get("p1").unwrap(), graph.get("p2").unwrap());
        assert!(p1.children.is_empty());
        assert!(p2.parents.is_empty());
        assert!(p1.relationships.is_empty());
        assert!(p2.relationships.is_empty());
    }

    #[test]
    fn delete_relation_is_tolerant() {
        let graph = graph_with(&["p1"]);
        let change = Change::delete_relation("p1", "ghost", RelationKind::Child);
        assert_eq!(apply(&graph, &op(change)), Some(graph));
    }

    #[test]
    fn delete_node_scrubs_references() {
        let mut graph = graph_with(&["p1", "p2", "p3"]);
        graph
            .try_apply(&Change::add_relation("p1", "p2", RelationKind::Child))
            .unwrap();
        graph
            .try_apply(&Change::add_relation_with(
                "p2",
                "p3",
                RelationKind::Spouse,
                RelationshipMeta::new("married"),
            ))
            .unwrap();

        let graph = apply(&graph, &op(Change::delete_node("p2"))).unwrap();

        assert!(!graph.contains("p2"));
        assert!(graph.get("p1").unwrap().children.is_empty());
        assert!(graph.get("p3").unwrap().spouses.is_empty());
        assert!(graph.get("p3").unwrap().relationships.is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn delete_absent_node_is_noop() {
        let graph = graph_with(&["p1"]);
        assert_eq!(apply(&graph, &op(Change::delete_node("p9"))), Some(graph));
    }

    #[test]
    fn sequential_skips_rejections() {
        let ops = vec![
            op(Change::add_node(Entity::new("p1"))).with_sequence(1),
            op(Change::update_prop("ghost", json!({"a": 1}))).with_sequence(2),
            op(Change::update_prop("p1", json!({"a": 2}))).with_sequence(3),
        ];

        let outcome = apply_sequential(&Graph::new(), &ops);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.max_sequence, Some(3));
        assert_eq!(
            outcome.rejected,
            vec![Rejection {
                sequence: Some(2),
                type_name: "UPDATE_PROP",
                error: Error::EntityNotFound("ghost".into()),
            }]
        );
        assert_eq!(outcome.graph.get("p1").unwrap().field("a"), Some(&json!(2)));
    }
}
