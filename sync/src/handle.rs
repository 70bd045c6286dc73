//! Host-facing handle to a running engine.

use crate::{
    engine::Command,
    error::{Result, SyncError},
    events::{SyncEvent, SyncStatus},
    role::Role,
};
use dashmap::DashSet;
use lineage_engine::{Change, EntityId, Graph, SequenceNumber};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// State the actor writes and any thread may read.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    /// Entities with a local operation not yet confirmed
    pub(crate) syncing: DashSet<EntityId>,
    pub(crate) cursor: AtomicU64,
    pub(crate) pending: AtomicUsize,
}

/// Cloneable handle to a running [`SyncEngine`](crate::SyncEngine).
///
/// Reads (`graph`, `status`, `is_syncing`, ...) never wait for the actor.
/// Once the engine has stopped, `enqueue` returns `false` and the other
/// commands fail with [`SyncError::Shutdown`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    graph: watch::Receiver<Arc<Graph>>,
    status: watch::Receiver<SyncStatus>,
    role: watch::Receiver<Option<Role>>,
    events: broadcast::Sender<SyncEvent>,
    shared: Arc<Shared>,
}

impl SyncHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        graph: watch::Receiver<Arc<Graph>>,
        status: watch::Receiver<SyncStatus>,
        role: watch::Receiver<Option<Role>>,
        events: broadcast::Sender<SyncEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            commands,
            graph,
            status,
            role,
            events,
            shared,
        }
    }

    /// Apply a change optimistically and queue it for the central log.
    ///
    /// Returns `false` without side effects when the tree has no server id
    /// or the engine has stopped.
    pub async fn enqueue(&self, change: Change) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Enqueue { change, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Fetch and apply everything past the cursor. Returns the number of
    /// operations fetched.
    pub async fn reconcile(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Reconcile { reply })
            .map_err(|_| SyncError::Shutdown)?;
        rx.await.map_err(|_| SyncError::Shutdown)?
    }

    /// Pause (`false`) or resume (`true`) flushing. Resuming also resubscribes
    /// and catches up with the central log.
    pub fn set_online(&self, online: bool) -> Result<()> {
        self.commands
            .send(Command::SetOnline(online))
            .map_err(|_| SyncError::Shutdown)
    }

    /// Persist buffered edits and stop the engine. Queued entries stay in
    /// durable storage for the next start.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .map_err(|_| SyncError::Shutdown)?;
        rx.await.map_err(|_| SyncError::Shutdown)?
    }

    /// The visible graph: confirmed state plus every pending local operation.
    pub fn graph(&self) -> Arc<Graph> {
        self.graph.borrow().clone()
    }

    /// Receiver notified on every graph update.
    pub fn watch_graph(&self) -> watch::Receiver<Arc<Graph>> {
        self.graph.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Last role received for the tree, if any.
    pub fn role(&self) -> Option<Role> {
        *self.role.borrow()
    }

    /// Whether a local operation on `id` has not been confirmed yet.
    pub fn is_syncing(&self, id: &str) -> bool {
        self.shared.syncing.contains(id)
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Highest sequence number folded into the confirmed graph.
    pub fn cursor(&self) -> SequenceNumber {
        self.shared.cursor.load(Ordering::SeqCst)
    }

    /// Local operations not yet committed.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }
}
