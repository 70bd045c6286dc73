//! # Lineage Engine
//!
//! A deterministic operation-application engine for a collaborative
//! family-tree graph.
//!
//! This crate holds the pure half of Lineage's delta synchronization: the
//! entity graph, the operation model, the application engine that folds
//! operations into the graph, and the reorder buffer that reassembles a
//! strictly ordered operation stream. The async pipelines that move operations
//! between devices and the central log live in `lineage-sync`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of storage, network or timers
//! - **Deterministic**: the same graph and the same operations always produce
//!   the same graph
//! - **Idempotent**: replaying an `ADD_NODE`, `ADD_RELATION` or
//!   `DELETE_RELATION` leaves the graph unchanged
//! - **Never panics**: operations that cannot be applied are rejected with an
//!   [`Error`], the graph is left untouched
//!
//! ## Core Concepts
//!
//! ### Entities and the graph
//!
//! An [`Entity`] is a person in the tree: free-form scalar fields plus three
//! relationship sets (`parents`, `children`, `spouses`) and pairwise
//! relationship metadata. The [`Graph`] keeps the sets bidirectionally
//! consistent and enforces the two-parent limit.
//!
//! ### Operations
//!
//! Every mutation is an [`Operation`] carrying a typed [`Change`]:
//! - [`Change::AddNode`] - insert a person, optionally wired to a relative
//! - [`Change::UpdateProp`] - merge scalar fields (last writer wins)
//! - [`Change::AddRelation`] / [`Change::DeleteRelation`] - edit an edge
//! - [`Change::DeleteNode`] - remove a person and every reference to them
//!
//! The central log assigns each committed operation a per-tree sequence
//! number, the sole ordering authority.
//!
//! ### Ordering
//!
//! The [`ReorderBuffer`] holds operations that arrived ahead of a missing
//! predecessor and decides, per drain, whether a sequential batch can be
//! applied or a gap has to be healed by reconciliation.
//!
//! ## Quick Start
//!
//! ```rust
//! use lineage_engine::{apply, Change, Entity, Graph, Operation, RelationKind};
//! use serde_json::json;
//!
//! let tree = "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f";
//! let mut graph = Graph::new();
//!
//! for id in ["p1", "p2"] {
//!     let op = Operation::new(tree, "alice", Change::add_node(Entity::new(id)), 1_000);
//!     graph = apply(&graph, &op).expect("fresh node applies");
//! }
//!
//! let op = Operation::new(tree, "alice", Change::add_relation("p1", "p2", RelationKind::Child), 1_001);
//! graph = apply(&graph, &op).unwrap();
//!
//! let op = Operation::new(tree, "alice", Change::update_prop("p2", json!({"firstName": "Ada"})), 1_002);
//! graph = apply(&graph, &op).unwrap();
//!
//! assert!(graph.get("p2").unwrap().parents.contains("p1"));
//! assert_eq!(graph.get("p2").unwrap().field("firstName"), Some(&json!("Ada")));
//! assert!(graph.is_consistent());
//! ```
//!
//! ## Persistence
//!
//! [`TreeSnapshot`] pairs a graph with its sync cursor (the last applied
//! sequence number) and serializes to JSON with deterministic ordering.

pub mod apply;
pub mod entity;
pub mod error;
pub mod graph;
pub mod operation;
pub mod reorder;
pub mod snapshot;
pub mod validate;

// Re-export main types at crate root
pub use apply::{apply, apply_sequential, Rejection, SequentialOutcome};
pub use entity::{Entity, RelationKind, RelationshipMeta, RESERVED_FIELDS};
pub use error::Error;
pub use graph::{Graph, Violation};
pub use operation::{
    AddNode, Change, DeleteNode, Operation, PendingOperation, RelationChange, UpdateProp,
};
pub use reorder::{Extraction, Insertion, ReorderBuffer};
pub use snapshot::{TreeSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use validate::{is_valid_entity_id, is_valid_tree_id, validate_operation, validate_pending};

/// Type aliases for clarity
pub type EntityId = String;
pub type TreeId = String;
pub type AuthorId = String;
pub type LocalId = String;
pub type SequenceNumber = u64;
pub type Timestamp = u64;
