//! Entity types: the people in the tree.

use crate::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Field names that belong to the entity's structure and can never be stored
/// as scalar attributes.
pub const RESERVED_FIELDS: [&str; 5] = ["id", "parents", "children", "spouses", "relationships"];

/// Kind of relationship between two entities.
///
/// Always read relative to a subject: `Parent` in `ADD_RELATION{idA, idB}`
/// means B is a parent of A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Parent,
    Child,
    Spouse,
}

impl RelationKind {
    /// All kinds, in a fixed order.
    pub const ALL: [RelationKind; 3] = [RelationKind::Parent, RelationKind::Child, RelationKind::Spouse];

    /// The kind seen from the other endpoint.
    pub fn inverse(self) -> Self {
        match self {
            RelationKind::Parent => RelationKind::Child,
            RelationKind::Child => RelationKind::Parent,
            RelationKind::Spouse => RelationKind::Spouse,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Parent => "parent",
            RelationKind::Child => "child",
            RelationKind::Spouse => "spouse",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form metadata about a pairwise relationship (marriage date, place...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMeta {
    /// Relationship type, e.g. "married", "partner", "divorced"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
}

impl RelationshipMeta {
    pub fn new(relation_type: impl Into<String>) -> Self {
        Self {
            relation_type: Some(relation_type.into()),
            ..Self::default()
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_place(mut self, place: impl Into<String>) -> Self {
        self.place = Some(place.into());
        self
    }
}

/// A node of the family-tree graph.
///
/// Scalar attributes are flattened next to the structural fields on the wire,
/// so a person serializes as `{"id": "p1", "firstName": "Ada", "parents": [...], ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier within the tree
    pub id: EntityId,
    #[serde(default)]
    pub parents: BTreeSet<EntityId>,
    #[serde(default)]
    pub children: BTreeSet<EntityId>,
    #[serde(default)]
    pub spouses: BTreeSet<EntityId>,
    /// Pairwise metadata keyed by the related entity's id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<EntityId, RelationshipMeta>,
    /// Scalar attributes (names, dates, notes...)
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    /// Create an entity with no fields and no relationships.
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            spouses: BTreeSet::new(),
            relationships: BTreeMap::new(),
            fields: serde_json::Map::new(),
        }
    }

    /// Builder-style method to set a scalar field. Reserved names are ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        if !is_reserved_field(&key) {
            self.fields.insert(key, value);
        }
        self
    }

    /// Builder-style method to list a relative.
    pub fn with_relation(mut self, kind: RelationKind, id: impl Into<EntityId>) -> Self {
        self.relations_mut(kind).insert(id.into());
        self
    }

    /// Get a scalar field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// The relationship set for a kind.
    pub fn relations(&self, kind: RelationKind) -> &BTreeSet<EntityId> {
        match kind {
            RelationKind::Parent => &self.parents,
            RelationKind::Child => &self.children,
            RelationKind::Spouse => &self.spouses,
        }
    }

    /// Mutable access to the relationship set for a kind.
    pub fn relations_mut(&mut self, kind: RelationKind) -> &mut BTreeSet<EntityId> {
        match kind {
            RelationKind::Parent => &mut self.parents,
            RelationKind::Child => &mut self.children,
            RelationKind::Spouse => &mut self.spouses,
        }
    }

    /// Iterate every `(kind, related id)` link of this entity.
    pub fn links(&self) -> impl Iterator<Item = (RelationKind, &EntityId)> {
        RelationKind::ALL
            .into_iter()
            .flat_map(move |kind| self.relations(kind).iter().map(move |id| (kind, id)))
    }

    /// Whether `other` appears in any of the three sets.
    pub fn references(&self, other: &str) -> bool {
        self.parents.contains(other) || self.children.contains(other) || self.spouses.contains(other)
    }

    /// Remove every reference to `other`, including relationship metadata.
    pub(crate) fn forget(&mut self, other: &str) {
        self.parents.remove(other);
        self.children.remove(other);
        self.spouses.remove(other);
        self.relationships.remove(other);
    }
}

/// Check whether a field name is structural.
pub fn is_reserved_field(key: &str) -> bool {
    RESERVED_FIELDS.contains(&key)
}
