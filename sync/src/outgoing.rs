//! Outgoing pipeline.
//!
//! Local operations are persisted first, then batched behind a debounce
//! window and sent to the central log as one atomic call. Field edits are
//! merged per entity before they ever reach the durable queue.

use crate::{
    engine::{SyncActor, TaskResult},
    error::{Result, SyncError, TransportError},
    events::{SyncEvent, SyncStatus},
};
use lineage_engine::{
    validate_pending, Change, EntityId, Error, Operation, PendingOperation, SequenceNumber,
};
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// A field edit waiting for its debounce window to close.
#[derive(Debug, Clone)]
struct PropEdit {
    op: Operation,
    deadline: Instant,
}

/// Local operations that are not yet part of the confirmed graph.
#[derive(Debug, Default)]
pub(crate) struct Outgoing {
    /// `UPDATE_PROP` edits being merged, in first-edit order
    props: Vec<PropEdit>,
    /// Persisted and waiting for the next flush
    pub(crate) queue: VecDeque<PendingOperation>,
    /// Batch handed to the transport
    pub(crate) in_flight: Option<Vec<PendingOperation>>,
    /// Committed by the central log, not yet applied by the incoming pipeline
    pub(crate) landing: Vec<Operation>,
    pub(crate) flush_deadline: Option<Instant>,
    client_version: u64,
    /// Local operations committed since start
    committed: u64,
}

impl Outgoing {
    /// Merge a field edit into the buffer. An edit to an entity that already
    /// has a buffered edit joins its window; otherwise a new window opens.
    pub(crate) fn merge_prop(&mut self, op: Operation, now: Instant, window: Duration) {
        let Change::UpdateProp(incoming) = &op.change else {
            return;
        };

        for edit in &mut self.props {
            if let Change::UpdateProp(buffered) = &mut edit.op.change {
                if buffered.id == incoming.id {
                    buffered.updates.extend(incoming.updates.clone());
                    edit.op.created_at = op.created_at;
                    return;
                }
            }
        }

        self.props.push(PropEdit {
            op,
            deadline: now + window,
        });
    }

    /// Earliest prop window deadline.
    pub(crate) fn prop_deadline(&self) -> Option<Instant> {
        self.props.iter().map(|edit| edit.deadline).min()
    }

    /// Remove the edits whose window has closed.
    pub(crate) fn take_due_props(&mut self, now: Instant) -> Vec<Operation> {
        let (due, waiting): (Vec<PropEdit>, Vec<PropEdit>) = std::mem::take(&mut self.props)
            .into_iter()
            .partition(|edit| edit.deadline <= now);
        self.props = waiting;
        due.into_iter().map(|edit| edit.op).collect()
    }

    pub(crate) fn take_all_props(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.props)
            .into_iter()
            .map(|edit| edit.op)
            .collect()
    }

    pub(crate) fn next_client_version(&mut self) -> u64 {
        self.client_version += 1;
        self.client_version
    }

    /// Seed the version counter from recovered entries.
    pub(crate) fn observe_client_version(&mut self, version: u64) {
        self.client_version = self.client_version.max(version);
    }

    /// Split the queue into entries fit to send and entries to drop.
    pub(crate) fn partition(
        &mut self,
        max_retries: u32,
    ) -> (Vec<PendingOperation>, Vec<(PendingOperation, Error)>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();

        for pending in self.queue.drain(..) {
            match validate_pending(&pending, max_retries) {
                Ok(()) => valid.push(pending),
                Err(e) => invalid.push((pending, e)),
            }
        }

        (valid, invalid)
    }

    /// Put a failed batch back at the head of the queue, keeping its order.
    pub(crate) fn requeue_front(&mut self, batch: Vec<PendingOperation>) {
        for pending in batch.into_iter().rev() {
            self.queue.push_front(pending);
        }
    }

    /// Count committed local operations. Returns the new total when it
    /// crosses a multiple of `every`.
    pub(crate) fn record_committed(&mut self, count: u64, every: u64) -> Option<u64> {
        let before = self.committed;
        self.committed += count;
        (self.committed / every > before / every).then_some(self.committed)
    }

    /// Whether any local operation on `id` is still waiting for the network.
    pub(crate) fn targets(&self, id: &str) -> bool {
        self.props.iter().any(|edit| edit.op.target_id() == id)
            || self.queue.iter().any(|p| p.operation.target_id() == id)
            || self
                .in_flight
                .iter()
                .flatten()
                .any(|p| p.operation.target_id() == id)
    }

    /// Every local operation in the order it applies on top of the confirmed
    /// graph.
    pub(crate) fn local_ops(&self) -> impl Iterator<Item = &Operation> {
        self.landing
            .iter()
            .chain(self.in_flight.iter().flatten().map(|p| &p.operation))
            .chain(self.queue.iter().map(|p| &p.operation))
            .chain(self.props.iter().map(|edit| &edit.op))
    }

    /// Drop landing operations the confirmed graph has caught up with.
    pub(crate) fn settle_landing(&mut self, cursor: SequenceNumber) {
        self.landing
            .retain(|op| op.sequence_number.is_some_and(|seq| seq > cursor));
    }

    /// Entries not yet committed.
    pub(crate) fn len(&self) -> usize {
        self.props.len()
            + self.queue.len()
            + self.in_flight.as_ref().map_or(0, Vec::len)
    }
}

fn local_ids(batch: &[PendingOperation]) -> Vec<String> {
    batch.iter().filter_map(|p| p.local_id.clone()).collect()
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

impl SyncActor {
    /// Accept a local change. Returns `false` when sync is disabled for the
    /// tree.
    pub(crate) async fn enqueue(&mut self, change: Change) -> bool {
        if !self.sync_enabled {
            tracing::warn!(
                tree_id = %self.tree_id,
                op_type = change.type_name(),
                "Ignoring operation for a tree without a server id"
            );
            return false;
        }

        let op = Operation::new(&self.tree_id, &self.author_id, change, now_millis());
        self.shared.syncing.insert(op.target_id().clone());

        if matches!(op.change, Change::UpdateProp(_)) {
            tracing::debug!(entity_id = %op.target_id(), "Buffering field edit");
            self.outgoing
                .merge_prop(op, Instant::now(), self.config.prop_debounce);
        } else {
            self.release_all_props().await;
            self.queue_local(op).await;
        }

        self.publish();
        true
    }

    /// Persist an operation and add it to the next batch.
    async fn queue_local(&mut self, op: Operation) {
        let version = self.outgoing.next_client_version();
        let mut pending = PendingOperation::new(op, version);

        match self.queue.save(&pending).await {
            Ok(local_id) => pending.local_id = Some(local_id),
            Err(e) => {
                tracing::warn!(error = %e, op_type = pending.operation.type_name(), "Failed to persist operation");
            }
        }

        tracing::debug!(
            op_type = pending.operation.type_name(),
            entity_id = %pending.operation.target_id(),
            queued = self.outgoing.queue.len() + 1,
            "Operation queued"
        );
        self.outgoing.queue.push_back(pending);
        self.arm_flush();
    }

    pub(crate) fn arm_flush(&mut self) {
        self.outgoing.flush_deadline = Some(Instant::now() + self.config.outgoing_debounce);
    }

    pub(crate) async fn release_due_props(&mut self) {
        for op in self.outgoing.take_due_props(Instant::now()) {
            self.queue_local(op).await;
        }
        self.publish();
    }

    async fn release_all_props(&mut self) {
        for op in self.outgoing.take_all_props() {
            self.queue_local(op).await;
        }
    }

    /// Persist buffered field edits without queueing them for this run.
    pub(crate) async fn persist_props(&mut self) -> Result<()> {
        let mut result = Ok(());
        for op in self.outgoing.take_all_props() {
            let version = self.outgoing.next_client_version();
            if let Err(e) = self.queue.save(&PendingOperation::new(op, version)).await {
                tracing::error!(error = %e, "Failed to persist field edit");
                result = Err(SyncError::Storage(e));
            }
        }
        result
    }

    /// Clear the syncing marker of every id no pending operation targets.
    pub(crate) fn release_locks<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a EntityId>,
    {
        for id in ids {
            if !self.outgoing.targets(id) {
                self.shared.syncing.remove(id);
            }
        }
    }

    async fn purge(&mut self, batch: &[PendingOperation]) {
        let ids = local_ids(batch);
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.queue.bulk_delete(&ids).await {
            tracing::warn!(error = %e, entries = ids.len(), "Failed to purge durable entries");
        }
    }

    /// Debounce timer fired.
    pub(crate) async fn flush(&mut self) {
        self.outgoing.flush_deadline = None;

        if self.outgoing.in_flight.is_some() || !self.online || self.outgoing.queue.is_empty() {
            return;
        }

        let (valid, invalid) = self.outgoing.partition(self.config.max_retries);

        if !invalid.is_empty() {
            let dropped: Vec<PendingOperation> =
                invalid.iter().map(|(pending, _)| pending.clone()).collect();
            self.purge(&dropped).await;

            for (pending, reason) in invalid {
                tracing::warn!(
                    op_type = pending.operation.type_name(),
                    entity_id = %pending.operation.target_id(),
                    error = %reason,
                    "Dropping invalid operation"
                );
                if matches!(reason, Error::RetryLimitExceeded { .. }) {
                    self.emit(SyncEvent::Discarded {
                        operation: pending.operation,
                        reason,
                    });
                }
            }
            self.release_locks(dropped.iter().map(|p| p.operation.target_id()));
        }

        if valid.is_empty() {
            self.publish();
            return;
        }

        let ops: Vec<Operation> = valid.iter().map(|p| p.operation.clone()).collect();
        let count = ops.len();
        self.outgoing.in_flight = Some(valid);

        let transport = self.transport.clone();
        let results = self.results.clone();
        let safety = self.config.safety_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(safety, transport.send_batch(ops)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::timeout(format!(
                    "no response within {}ms",
                    safety.as_millis()
                ))),
            };
            let _ = results.send(TaskResult::Flushed(result));
        });

        tracing::debug!(tree_id = %self.tree_id, operations = count, "Flushing batch");
        self.set_status(SyncStatus::Syncing);
        self.emit(SyncEvent::SyncStarted { operations: count });
        self.publish();
    }

    /// The transport answered (or the safety timeout fired).
    pub(crate) async fn on_flushed(
        &mut self,
        result: std::result::Result<Vec<Operation>, TransportError>,
    ) {
        let Some(batch) = self.outgoing.in_flight.take() else {
            return;
        };

        match result {
            Ok(committed) => {
                self.purge(&batch).await;
                self.release_locks(batch.iter().map(|p| p.operation.target_id()));

                let count = committed.len();
                tracing::info!(tree_id = %self.tree_id, operations = count, "Batch committed");

                if let Some(total) = self
                    .outgoing
                    .record_committed(count as u64, self.config.backup_every)
                {
                    self.emit(SyncEvent::BackupDue { committed: total });
                }

                self.set_status(self.resting_status());
                self.emit(SyncEvent::SyncSucceeded { operations: count });

                let cursor = self.cursor;
                self.outgoing.landing.extend(
                    committed
                        .iter()
                        .filter(|op| op.sequence_number.is_some_and(|seq| seq > cursor))
                        .cloned(),
                );
                for op in committed {
                    self.queue_incoming(op);
                }
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(
                    tree_id = %self.tree_id,
                    error = %e,
                    dropped = batch.len(),
                    "Batch rejected, rolling back"
                );
                self.purge(&batch).await;
                self.release_locks(batch.iter().map(|p| p.operation.target_id()));

                self.set_status(SyncStatus::Error(e.to_string()));
                self.emit(SyncEvent::SyncFailed {
                    error: SyncError::Transport(e),
                    dropped: batch.len(),
                });
                self.request_reconcile(None);
            }
            Err(e) => {
                tracing::warn!(
                    tree_id = %self.tree_id,
                    error = %e,
                    operations = batch.len(),
                    "Batch failed, will retry"
                );
                let retried = batch
                    .into_iter()
                    .map(|mut pending| {
                        pending.retry_count += 1;
                        pending
                    })
                    .collect();
                self.outgoing.requeue_front(retried);

                if self.status() == SyncStatus::Syncing {
                    self.set_status(self.resting_status());
                }
            }
        }

        if !self.outgoing.queue.is_empty() {
            self.arm_flush();
        }
        self.publish();
    }
}
