//! Sync engine actor.
//!
//! One task owns the outgoing queue, the reorder buffer and both graphs. The
//! host talks to it through a [`SyncHandle`]; network calls run in spawned
//! tasks that post their results back, so the actor keeps serving enqueues and
//! pushes while a send or fetch is pending.
//!
//! ```text
//!   SyncHandle (Clone)          mpsc        SyncActor (tokio task)
//!   ┌─────────────────┐    ──────────▶   ┌─────────────────────────────┐
//!   │ .enqueue()      │                  │ outgoing queue + timers     │
//!   │ .reconcile()    │    ◀──────────   │ reorder buffer + cursor     │
//!   │ .graph()        │  oneshot/watch   │ confirmed + visible graph   │
//!   └─────────────────┘                  └─────────────────────────────┘
//!                                          ▲ flush / fetch / push results
//! ```

use crate::{
    config::SyncConfig,
    error::{Result, TransportError},
    events::{SyncEvent, SyncStatus},
    handle::{Shared, SyncHandle},
    incoming::Incoming,
    outgoing::Outgoing,
    reconcile::Reconciliation,
    role::{Role, RoleChannel},
    storage::DurableQueue,
    transport::{OperationStream, Transport},
};
use futures::StreamExt;
use lineage_engine::{
    is_valid_tree_id, AuthorId, Change, Graph, Operation, SequenceNumber, TreeId,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

// ============================================================================
// Messages (internal)
// ============================================================================

/// Sent from [`SyncHandle`] to the actor.
pub(crate) enum Command {
    Enqueue {
        change: Change,
        reply: oneshot::Sender<bool>,
    },
    Reconcile {
        reply: oneshot::Sender<Result<usize>>,
    },
    SetOnline(bool),
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Posted back by spawned network tasks.
pub(crate) enum TaskResult {
    Flushed(std::result::Result<Vec<Operation>, TransportError>),
    Fetched(std::result::Result<Vec<Operation>, TransportError>),
    Subscribed(std::result::Result<OperationStream, TransportError>),
}

// ============================================================================
// Builder
// ============================================================================

/// Sync engine for one tree on one device.
///
/// ```no_run
/// # async fn run() -> lineage_sync::Result<()> {
/// use lineage_engine::{Change, Entity};
/// use lineage_sync::{MemoryQueue, MemoryTransport, SyncEngine};
///
/// let handle = SyncEngine::new(
///     "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f",
///     "alice",
///     MemoryQueue::new_shared(),
///     MemoryTransport::new_shared(),
/// )
/// .start()
/// .await?;
///
/// handle.enqueue(Change::add_node(Entity::new("p1"))).await;
/// assert!(handle.graph().contains("p1"));
/// handle.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    tree_id: TreeId,
    author_id: AuthorId,
    config: SyncConfig,
    queue: Arc<dyn DurableQueue>,
    transport: Arc<dyn Transport>,
}

impl SyncEngine {
    pub fn new(
        tree_id: impl Into<TreeId>,
        author_id: impl Into<AuthorId>,
        queue: Arc<dyn DurableQueue>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            tree_id: tree_id.into(),
            author_id: author_id.into(),
            config: SyncConfig::default(),
            queue,
            transport,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Recover local state and start the actor.
    ///
    /// The latest checkpoint is loaded, pending durable entries are replayed
    /// optimistically and queued for sending, then the push subscription,
    /// the role channel and an initial reconciliation start. A tree id that
    /// is not a server id (a local placeholder) starts an engine with sync
    /// disabled. A configuration with a zero cadence or event capacity is
    /// refused.
    pub async fn start(self) -> Result<SyncHandle> {
        self.config.validate()?;

        let sync_enabled = is_valid_tree_id(&self.tree_id);
        let shared = Arc::new(Shared::default());

        let mut confirmed = Graph::new();
        let mut cursor = 0;
        let mut outgoing = Outgoing::default();

        if sync_enabled {
            if let Some(snapshot) = self.queue.load_snapshot(&self.tree_id).await? {
                match snapshot.validate_for(&self.tree_id) {
                    Ok(()) => {
                        cursor = snapshot.last_applied_sequence;
                        confirmed = snapshot.graph;
                    }
                    Err(e) => {
                        tracing::warn!(tree_id = %self.tree_id, error = %e, "Discarding unusable snapshot");
                    }
                }
            }

            let recovered = self.queue.list_pending(&self.tree_id).await?;
            if !recovered.is_empty() {
                tracing::info!(tree_id = %self.tree_id, operations = recovered.len(), "Recovered pending operations");
            }
            for pending in recovered {
                shared.syncing.insert(pending.operation.target_id().clone());
                outgoing.observe_client_version(pending.client_version);
                outgoing.queue.push_back(pending);
            }
        } else {
            tracing::warn!(tree_id = %self.tree_id, "Tree has no server id, sync disabled");
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (graph_tx, graph_rx) = watch::channel(Arc::new(confirmed.clone()));
        let (status_tx, status_rx) = watch::channel(SyncStatus::Idle);
        let (role_tx, role_rx) = watch::channel(None::<Role>);
        let (events_tx, _) = broadcast::channel(self.config.event_capacity);

        let role_channel = sync_enabled.then(|| {
            RoleChannel::start(
                self.transport.clone(),
                self.tree_id.clone(),
                role_tx,
                events_tx.clone(),
            )
        });

        let handle = SyncHandle::new(
            commands_tx,
            graph_rx,
            status_rx,
            role_rx,
            events_tx.clone(),
            shared.clone(),
        );

        let mut actor = SyncActor {
            tree_id: self.tree_id,
            author_id: self.author_id,
            config: self.config,
            queue: self.queue,
            transport: self.transport,
            sync_enabled,
            online: true,
            confirmed,
            cursor,
            outgoing,
            incoming: Incoming::default(),
            reconcile: Reconciliation::default(),
            subscription: None,
            subscribing: false,
            role_channel,
            shared,
            graph: graph_tx,
            status: status_tx,
            events: events_tx,
            results: results_tx,
        };

        if !actor.outgoing.queue.is_empty() {
            actor.arm_flush();
        }
        actor.publish();

        if sync_enabled {
            actor.subscribe();
            actor.request_reconcile(None);
        }

        tracing::info!(tree_id = %actor.tree_id, cursor = actor.cursor, "Sync engine started");
        tokio::spawn(actor.run(commands_rx, results_rx));

        Ok(handle)
    }
}

// ============================================================================
// Actor
// ============================================================================

pub(crate) struct SyncActor {
    pub(crate) tree_id: TreeId,
    pub(crate) author_id: AuthorId,
    pub(crate) config: SyncConfig,
    pub(crate) queue: Arc<dyn DurableQueue>,
    pub(crate) transport: Arc<dyn Transport>,
    /// False for trees without a server id
    pub(crate) sync_enabled: bool,
    /// Flushing is paused while false
    pub(crate) online: bool,
    /// Built only from committed operations, up to `cursor`
    pub(crate) confirmed: Graph,
    pub(crate) cursor: SequenceNumber,
    pub(crate) outgoing: Outgoing,
    pub(crate) incoming: Incoming,
    pub(crate) reconcile: Reconciliation,
    subscription: Option<OperationStream>,
    subscribing: bool,
    role_channel: Option<RoleChannel>,
    pub(crate) shared: Arc<Shared>,
    graph: watch::Sender<Arc<Graph>>,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    pub(crate) results: mpsc::UnboundedSender<TaskResult>,
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_push(subscription: &mut Option<OperationStream>) -> Option<Operation> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl SyncActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<TaskResult>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Stop { reply }) => {
                        let _ = reply.send(self.shutdown().await);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        let _ = self.shutdown().await;
                        break;
                    }
                },
                Some(result) = results.recv() => self.handle_result(result).await,
                push = next_push(&mut self.subscription) => match push {
                    Some(op) => self.queue_incoming(op),
                    None => {
                        tracing::warn!(tree_id = %self.tree_id, "Push subscription closed");
                        self.subscription = None;
                    }
                },
                _ = wait_for(self.outgoing.flush_deadline) => self.flush().await,
                _ = wait_for(self.outgoing.prop_deadline()) => self.release_due_props().await,
                _ = wait_for(self.incoming.deadline) => self.drain_intake().await,
            }
        }

        tracing::info!(tree_id = %self.tree_id, "Sync engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { change, reply } => {
                let accepted = self.enqueue(change).await;
                let _ = reply.send(accepted);
            }
            Command::Reconcile { reply } => self.request_reconcile(Some(reply)),
            Command::SetOnline(online) => self.set_online(online),
            // Handled by the loop
            Command::Stop { .. } => {}
        }
    }

    async fn handle_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Flushed(result) => self.on_flushed(result).await,
            TaskResult::Fetched(result) => self.on_fetched(result).await,
            TaskResult::Subscribed(result) => {
                self.subscribing = false;
                match result {
                    Ok(stream) => {
                        tracing::debug!(tree_id = %self.tree_id, "Push subscription open");
                        self.subscription = Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(tree_id = %self.tree_id, error = %e, "Push subscription failed");
                    }
                }
            }
        }
    }

    fn subscribe(&mut self) {
        if self.subscribing || self.subscription.is_some() {
            return;
        }
        self.subscribing = true;

        let transport = self.transport.clone();
        let results = self.results.clone();
        let tree_id = self.tree_id.clone();
        tokio::spawn(async move {
            let result = transport.subscribe(&tree_id).await;
            let _ = results.send(TaskResult::Subscribed(result));
        });
    }

    fn set_online(&mut self, online: bool) {
        if self.online == online || !self.sync_enabled {
            return;
        }
        self.online = online;

        if online {
            tracing::info!(tree_id = %self.tree_id, "Back online");
            if self.status() == SyncStatus::Offline {
                self.set_status(SyncStatus::Idle);
            }
            self.subscribe();
            if !self.outgoing.queue.is_empty() {
                self.arm_flush();
            }
            self.catch_up();
        } else {
            tracing::info!(tree_id = %self.tree_id, "Offline, flushing paused");
            if self.outgoing.in_flight.is_none() {
                self.set_status(SyncStatus::Offline);
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        let result = self.persist_props().await;
        self.subscription = None;
        if let Some(channel) = self.role_channel.take() {
            channel.stop();
        }
        self.publish();
        result
    }

    /// Recompute the visible graph and publish it in one swap.
    pub(crate) fn publish(&self) {
        let mut visible = self.confirmed.clone();
        for op in self.outgoing.local_ops() {
            // Optimistic replay; a change that no longer applies is skipped.
            let _ = visible.try_apply(&op.change);
        }

        self.graph.send_replace(Arc::new(visible));
        self.shared.cursor.store(self.cursor, Ordering::SeqCst);
        self.shared.pending.store(self.outgoing.len(), Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }

    /// Status once nothing is in flight.
    pub(crate) fn resting_status(&self) -> SyncStatus {
        if self.online {
            SyncStatus::Idle
        } else {
            SyncStatus::Offline
        }
    }
}
