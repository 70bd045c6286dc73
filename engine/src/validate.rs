//! Format validation for operations about to leave the device.
//!
//! Only the shape of ids is checked here. Whether the caller may write to a
//! tree is decided by the central log.

use crate::{error::Result, Error, Operation, PendingOperation};
use uuid::Uuid;

/// Longest accepted entity id.
pub const MAX_ENTITY_ID_LEN: usize = 128;

/// Whether `id` is a server-assigned tree id (a UUID).
///
/// Local placeholder trees that were never uploaded fail this check.
pub fn is_valid_tree_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

/// Whether `id` is a well-formed entity id: 1 to 128 ASCII letters, digits,
/// `-` or `_`.
pub fn is_valid_entity_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ENTITY_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Check that an operation is fit to send.
pub fn validate_operation(op: &Operation) -> Result<()> {
    if !is_valid_tree_id(&op.tree_id) {
        return Err(Error::InvalidTreeId(op.tree_id.clone()));
    }
    if op.author_id.trim().is_empty() {
        return Err(Error::MissingAuthor);
    }
    if let Some(bad) = op
        .change
        .entity_ids()
        .into_iter()
        .find(|id| !is_valid_entity_id(id))
    {
        return Err(Error::InvalidEntityId(bad.clone()));
    }
    Ok(())
}

/// Check a queued entry: the operation itself plus its retry budget.
pub fn validate_pending(pending: &PendingOperation, max_retries: u32) -> Result<()> {
    if pending.retry_count > max_retries {
        return Err(Error::RetryLimitExceeded {
            retries: pending.retry_count,
            limit: max_retries,
        });
    }
    validate_operation(&pending.operation)
}
