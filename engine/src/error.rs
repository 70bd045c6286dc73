//! Error types for the Lineage engine.

use crate::{EntityId, TreeId};
use thiserror::Error;

/// All possible errors from the Lineage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Application errors
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("invalid entity id: {0:?}")]
    InvalidEntityId(String),

    #[error("entity cannot be related to itself: {0}")]
    SelfRelation(EntityId),

    #[error("entity already has two parents: {0}")]
    ParentLimitReached(EntityId),

    // Validation errors
    #[error("invalid tree id: {0:?}")]
    InvalidTreeId(TreeId),

    #[error("operation has no author")]
    MissingAuthor,

    #[error("retry limit exceeded: {retries} retries, limit is {limit}")]
    RetryLimitExceeded { retries: u32, limit: u32 },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot belongs to tree {actual}, expected {expected}")]
    TreeMismatch { expected: TreeId, actual: TreeId },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
