//! Events and status published by the engine.

use crate::{error::SyncError, role::Role};
use lineage_engine::{Operation, SequenceNumber};

/// Something the host may want to react to. Subscribe with
/// [`SyncHandle::events`](crate::SyncHandle::events).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A batch left for the central log
    SyncStarted { operations: usize },
    /// The central log committed a batch
    SyncSucceeded { operations: usize },
    /// The central log refused a batch for good; it was dropped and the tree
    /// is being reconciled
    SyncFailed { error: SyncError, dropped: usize },
    /// A queued operation was given up on after too many retries
    Discarded {
        operation: Operation,
        reason: lineage_engine::Error,
    },
    /// The incoming stream has a hole; reconciliation was requested
    GapDetected {
        expected: SequenceNumber,
        next_available: SequenceNumber,
    },
    /// Committed operations were applied to the confirmed graph
    RemoteApplied {
        operations: usize,
        cursor: SequenceNumber,
    },
    /// A committed operation could not be applied and was stepped over
    OperationSkipped {
        sequence: Option<SequenceNumber>,
        reason: lineage_engine::Error,
    },
    ReconcileFailed { error: SyncError },
    RoleChanged(Role),
    /// Enough local operations were committed that a backup is due
    BackupDue { committed: u64 },
}

/// Coarse state of the outgoing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// A batch is in flight
    Syncing,
    /// Flushing is paused by the host
    Offline,
    /// The last sync or reconciliation failed; cleared by the next successful
    /// send
    Error(String),
}

impl SyncStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Error(_))
    }
}
