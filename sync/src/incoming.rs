//! Incoming pipeline.
//!
//! Every committed operation (realtime push, bulk fetch, commit
//! acknowledgement) goes through `queue_incoming`. Arrivals are collected for
//! a short window, ordered in the reorder buffer and folded into the confirmed
//! graph one gap-free batch at a time.

use crate::{engine::SyncActor, events::SyncEvent};
use lineage_engine::{apply_sequential, Extraction, Insertion, Operation, ReorderBuffer, TreeSnapshot};
use tokio::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct Incoming {
    /// Arrivals not yet ordered
    intake: Vec<Operation>,
    /// Closes the intake window; fixed from the first arrival
    pub(crate) deadline: Option<Instant>,
    pub(crate) buffer: ReorderBuffer,
    /// Operations applied since the last full snapshot
    applied_since_snapshot: u64,
}

impl SyncActor {
    /// Hand a committed operation to the incoming pipeline.
    pub(crate) fn queue_incoming(&mut self, op: Operation) {
        if op.tree_id != self.tree_id {
            tracing::warn!(tree_id = %op.tree_id, "Ignoring operation for another tree");
            return;
        }
        if op.sequence_number.is_none() {
            tracing::warn!(op_type = op.type_name(), "Ignoring operation without a sequence number");
            return;
        }

        self.incoming.intake.push(op);
        if self.incoming.deadline.is_none() {
            self.incoming.deadline = Some(Instant::now() + self.config.incoming_debounce);
        }
    }

    /// Intake window closed.
    pub(crate) async fn drain_intake(&mut self) {
        self.incoming.deadline = None;

        let mut buffered = 0;
        for op in std::mem::take(&mut self.incoming.intake) {
            let seq = op.sequence_number;
            match self.incoming.buffer.insert(op, self.cursor) {
                Insertion::Buffered => buffered += 1,
                outcome => tracing::trace!(sequence = ?seq, ?outcome, "Arrival not buffered"),
            }
        }

        // The reconciliation in flight drains the buffer when it lands.
        if self.reconcile.in_flight {
            if buffered > 0 {
                self.reconcile.buffered_during_fetch = true;
            }
            return;
        }
        self.drain_buffer(true).await;
    }

    /// Apply everything the buffer can release on top of the cursor.
    ///
    /// A gap is reported; it triggers reconciliation only when
    /// `allow_reconcile` is set.
    pub(crate) async fn drain_buffer(&mut self, allow_reconcile: bool) {
        loop {
            match self.incoming.buffer.extract(self.cursor) {
                Extraction::Bootstrap(ops) => {
                    tracing::debug!(operations = ops.len(), "Bootstrap delivery, skipping gap checks");
                    self.apply_remote(ops).await;
                }
                Extraction::Sequential(ops) => self.apply_remote(ops).await,
                Extraction::Gap {
                    expected,
                    next_available,
                } => {
                    tracing::warn!(
                        tree_id = %self.tree_id,
                        expected,
                        next_available,
                        buffered = self.incoming.buffer.len(),
                        "Gap in incoming operations"
                    );
                    self.emit(SyncEvent::GapDetected {
                        expected,
                        next_available,
                    });
                    if allow_reconcile {
                        self.request_reconcile(None);
                    }
                    break;
                }
                Extraction::Idle => break,
            }
        }
    }

    /// Fold committed operations, in order, into the confirmed graph.
    pub(crate) async fn apply_remote(&mut self, ops: Vec<Operation>) {
        if ops.is_empty() {
            return;
        }

        let outcome = apply_sequential(&self.confirmed, &ops);
        for rejection in outcome.rejected {
            tracing::warn!(
                sequence = ?rejection.sequence,
                op_type = rejection.type_name,
                error = %rejection.error,
                "Skipping operation that does not apply"
            );
            self.emit(SyncEvent::OperationSkipped {
                sequence: rejection.sequence,
                reason: rejection.error,
            });
        }

        self.confirmed = outcome.graph;
        if let Some(max) = outcome.max_sequence {
            self.cursor = self.cursor.max(max);
        }
        self.outgoing.settle_landing(self.cursor);
        self.release_locks(ops.iter().map(Operation::target_id));

        tracing::debug!(
            tree_id = %self.tree_id,
            operations = ops.len(),
            cursor = self.cursor,
            "Applied remote operations"
        );
        self.emit(SyncEvent::RemoteApplied {
            operations: ops.len(),
            cursor: self.cursor,
        });

        self.incoming.applied_since_snapshot += ops.len() as u64;
        self.checkpoint().await;
        self.publish();
    }

    /// Persist the confirmed graph: a full snapshot every `snapshot_every`
    /// applied operations, an incremental save otherwise.
    async fn checkpoint(&mut self) {
        let snapshot = TreeSnapshot::new(&self.tree_id, self.cursor, self.confirmed.clone());

        let result = if self.incoming.applied_since_snapshot >= self.config.snapshot_every {
            self.incoming.applied_since_snapshot = 0;
            self.queue.save_snapshot(&snapshot).await
        } else {
            self.queue.save_incremental(&snapshot).await
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, cursor = self.cursor, "Failed to checkpoint tree");
        }
    }
}
