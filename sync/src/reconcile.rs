//! Reconciliation - pulling the authoritative log past the cursor.
//!
//! Used for the initial load, reconnect catch-up, gap recovery and rollback
//! after a refused batch. Requests made while a fetch is in flight coalesce
//! into one follow-up fetch, and so does a gap that arrived during the fetch
//! and is still open after it lands. Failures are reported, never retried
//! here.

use crate::{
    engine::{SyncActor, TaskResult},
    error::{Result, SyncError, TransportError},
    events::{SyncEvent, SyncStatus},
};
use lineage_engine::{Error, Operation};
use tokio::sync::oneshot;
use tokio::time::Instant;

type Waiter = oneshot::Sender<Result<usize>>;

#[derive(Debug, Default)]
pub(crate) struct Reconciliation {
    pub(crate) in_flight: bool,
    /// Another fetch was requested while one was in flight
    again: bool,
    /// Callers answered by the fetch in flight
    waiters: Vec<Waiter>,
    /// Callers answered by the follow-up fetch
    next_waiters: Vec<Waiter>,
    /// Operations were buffered while the fetch was in flight
    pub(crate) buffered_during_fetch: bool,
    last_catch_up: Option<Instant>,
}

impl SyncActor {
    /// Request a fetch of everything past the cursor. `reply` is answered
    /// with the number of operations fetched.
    pub(crate) fn request_reconcile(&mut self, reply: Option<Waiter>) {
        if !self.sync_enabled {
            if let Some(reply) = reply {
                let _ = reply.send(Err(Error::InvalidTreeId(self.tree_id.clone()).into()));
            }
            return;
        }

        if self.reconcile.in_flight {
            self.reconcile.again = true;
            self.reconcile.next_waiters.extend(reply);
            return;
        }

        self.reconcile.waiters.extend(reply);
        self.start_fetch();
    }

    /// Reconnect catch-up, at most once per throttle window.
    pub(crate) fn catch_up(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.reconcile.last_catch_up {
            if now.duration_since(last) < self.config.reconnect_throttle {
                tracing::debug!("Catch-up throttled");
                return;
            }
        }
        self.reconcile.last_catch_up = Some(now);
        self.request_reconcile(None);
    }

    fn start_fetch(&mut self) {
        self.reconcile.in_flight = true;
        self.reconcile.buffered_during_fetch = false;

        let transport = self.transport.clone();
        let results = self.results.clone();
        let tree_id = self.tree_id.clone();
        let after = self.cursor;
        tokio::spawn(async move {
            let result = transport.fetch_since(&tree_id, after).await;
            let _ = results.send(TaskResult::Fetched(result));
        });

        tracing::debug!(tree_id = %self.tree_id, after, "Reconciling");
    }

    pub(crate) async fn on_fetched(
        &mut self,
        result: std::result::Result<Vec<Operation>, TransportError>,
    ) {
        self.reconcile.in_flight = false;
        let waiters = std::mem::take(&mut self.reconcile.waiters);

        let reply = match result {
            Ok(mut ops) => {
                let cursor = self.cursor;
                ops.retain(|op| op.sequence_number.is_some_and(|seq| seq > cursor));
                ops.sort_by_key(|op| op.sequence_number);
                ops.dedup_by_key(|op| op.sequence_number);

                let count = ops.len();
                tracing::info!(tree_id = %self.tree_id, operations = count, "Reconciled");

                self.apply_remote(ops).await;
                self.incoming.buffer.prune(self.cursor);
                // Pushes that arrived after the fetch read the log may sit
                // past a hole it could not see. A queued follow-up covers it.
                let retry_gap = std::mem::take(&mut self.reconcile.buffered_during_fetch)
                    && !self.reconcile.again;
                self.drain_buffer(retry_gap).await;
                Ok(count)
            }
            Err(e) => {
                tracing::error!(tree_id = %self.tree_id, error = %e, "Reconciliation failed");
                self.set_status(SyncStatus::Error(e.to_string()));
                self.emit(SyncEvent::ReconcileFailed {
                    error: SyncError::ReconcileFailed(e.clone()),
                });
                Err(SyncError::ReconcileFailed(e))
            }
        };

        for waiter in waiters {
            let _ = waiter.send(reply.clone());
        }

        if std::mem::take(&mut self.reconcile.again) {
            self.reconcile.waiters = std::mem::take(&mut self.reconcile.next_waiters);
            self.start_fetch();
        }
    }
}
