//! Graph - the in-memory entity store.
//!
//! The graph holds every entity of one tree. It is a plain value: the sync
//! engine replaces it wholesale after each batch instead of mutating it from
//! several places.

use crate::{entity::Entity, EntityId, RelationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of parents an entity may have.
pub const MAX_PARENTS: usize = 2;

/// A broken structural invariant, reported by [`Graph::check_consistency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// `from` lists `to` under `kind` but `to` does not list `from` back.
    MissingInverse {
        from: EntityId,
        to: EntityId,
        kind: RelationKind,
    },
    /// `from` lists an entity that is not in the graph.
    DanglingReference {
        from: EntityId,
        to: EntityId,
        kind: RelationKind,
    },
    /// An entity lists itself.
    SelfReference { id: EntityId, kind: RelationKind },
    TooManyParents { id: EntityId, count: usize },
}

/// The entity graph of one tree.
///
/// Uses BTreeMap so that equality and serialization do not depend on
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    entities: BTreeMap<EntityId, Entity>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
        }
    }

    /// Get an entity by ID.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub(crate) fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Entity> {
        self.entities.remove(id)
    }

    pub(crate) fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Check if an entity exists.
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Iterate all entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Iterate all ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether adding `parent` to `child`'s parents would exceed the limit.
    pub(crate) fn parent_slot_taken(&self, child: &str, parent: &str) -> bool {
        match self.entities.get(child) {
            Some(e) => !e.parents.contains(parent) && e.parents.len() >= MAX_PARENTS,
            None => false,
        }
    }

    /// Collect every violation of the structural invariants.
    ///
    /// An empty result means: every link has its inverse, no link dangles,
    /// nobody is their own relative and nobody has more than two parents.
    pub fn check_consistency(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for entity in self.entities.values() {
            if entity.parents.len() > MAX_PARENTS {
                violations.push(Violation::TooManyParents {
                    id: entity.id.clone(),
                    count: entity.parents.len(),
                });
            }

            for (kind, other) in entity.links() {
                if other == &entity.id {
                    violations.push(Violation::SelfReference {
                        id: entity.id.clone(),
                        kind,
                    });
                    continue;
                }
                match self.entities.get(other) {
                    None => violations.push(Violation::DanglingReference {
                        from: entity.id.clone(),
                        to: other.clone(),
                        kind,
                    }),
                    Some(target) if !target.relations(kind.inverse()).contains(&entity.id) => {
                        violations.push(Violation::MissingInverse {
                            from: entity.id.clone(),
                            to: other.clone(),
                            kind,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        violations
    }

    /// Shorthand for an empty [`Graph::check_consistency`].
    pub fn is_consistent(&self) -> bool {
        self.check_consistency().is_empty()
    }
}

impl FromIterator<Entity> for Graph {
    /// Build a graph verbatim, without wiring inverse edges. Meant for loading
    /// trusted data; run [`Graph::check_consistency`] on anything else.
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Self {
            entities: iter.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }
}
