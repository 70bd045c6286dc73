//! Central log kept in process memory.
//!
//! Tracks realtime subscribers per tree and pushes every committed operation
//! to them, like the realtime channel of the hosted backend would.

use crate::{
    error::TransportError,
    role::Role,
    transport::{OperationStream, RoleStream, Transport},
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::StreamExt;
use lineage_engine::{validate_operation, Operation, SequenceNumber, TreeId};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A realtime subscription.
#[derive(Debug)]
struct Subscriber<T> {
    tree_id: TreeId,
    sender: mpsc::UnboundedSender<T>,
}

/// Scripted misbehaviour.
#[derive(Debug, Default)]
struct Faults {
    /// Errors returned by the next sends, one per call
    scripted: VecDeque<TransportError>,
    /// Every call fails with a network error
    offline: bool,
    /// Sends never complete
    hold_sends: bool,
    /// Sequence numbers whose push is dropped once
    suppressed: HashSet<SequenceNumber>,
    /// Every fetch fails with this error
    fetch_error: Option<TransportError>,
}

/// What `send_batch` should do, decided under the fault lock.
enum SendPlan {
    Hang,
    Fail(TransportError),
    Commit,
}

/// [`Transport`] backed by an in-memory log per tree.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    logs: DashMap<TreeId, Vec<Operation>>,
    /// Serializes commits so a batch gets consecutive numbers
    commit_lock: Mutex<()>,
    subscribers: DashMap<String, Subscriber<Operation>>,
    role_subscribers: DashMap<String, Subscriber<Role>>,
    roles: DashMap<TreeId, Role>,
    faults: Mutex<Faults>,
    sends: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new transport wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign sequence numbers and append to the logs. Returns the committed
    /// operations in input order.
    fn commit(&self, ops: Vec<Operation>) -> Vec<Operation> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);

        ops.into_iter()
            .map(|op| {
                let mut log = self.logs.entry(op.tree_id.clone()).or_default();
                let committed = op.with_sequence(log.len() as SequenceNumber + 1);
                log.push(committed.clone());
                committed
            })
            .collect()
    }

    /// Push operations to every subscriber of their tree.
    ///
    /// Returns the number of deliveries.
    fn broadcast(&self, ops: &[Operation]) -> usize {
        let outgoing: Vec<&Operation> = {
            let mut faults = self.faults();
            ops.iter()
                .filter(|op| match op.sequence_number {
                    Some(seq) => !faults.suppressed.remove(&seq),
                    None => true,
                })
                .collect()
        };

        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let sub = entry.value();
            for op in outgoing.iter().filter(|op| op.tree_id == sub.tree_id) {
                if sub.sender.unbounded_send((*op).clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(entry.key().clone());
                    break;
                }
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(sub_id = %id, "Subscriber dropped");
        }

        tracing::debug!(operations = outgoing.len(), deliveries = delivered, "Broadcast operations");
        delivered
    }

    // ---- Test controls -----------------------------------------------------

    /// Commit operations on behalf of another client and push them.
    pub fn commit_remote(&self, ops: Vec<Operation>) -> Vec<Operation> {
        let committed = self.commit(ops);
        self.broadcast(&committed);
        committed
    }

    /// Push an operation to subscribers without committing it.
    pub fn push_raw(&self, op: Operation) -> usize {
        self.broadcast(std::slice::from_ref(&op))
    }

    /// Change the caller's role on a tree and push it.
    pub fn push_role(&self, tree_id: &str, role: Role) -> usize {
        self.roles.insert(tree_id.to_string(), role);

        let mut delivered = 0;
        self.role_subscribers.retain(|_, sub| {
            if sub.tree_id != tree_id {
                return true;
            }
            let open = sub.sender.unbounded_send(role).is_ok();
            delivered += usize::from(open);
            open
        });
        delivered
    }

    /// Committed log of a tree.
    pub fn log(&self, tree_id: &str) -> Vec<Operation> {
        self.logs
            .get(tree_id)
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Go offline (every call fails, push subscriptions close) or back online.
    pub fn set_offline(&self, offline: bool) {
        self.faults().offline = offline;
        if offline {
            self.subscribers.clear();
        }
    }

    /// Fail the next `count` sends with `error`.
    pub fn fail_next_sends(&self, error: TransportError, count: usize) {
        let mut faults = self.faults();
        faults.scripted.extend(std::iter::repeat(error).take(count));
    }

    /// Make sends started from now on hang forever.
    pub fn hold_sends(&self, hold: bool) {
        self.faults().hold_sends = hold;
    }

    /// Drop the next push of `seq`.
    pub fn suppress_push(&self, seq: SequenceNumber) {
        self.faults().suppressed.insert(seq);
    }

    /// Fail every fetch with `error` until called with `None`.
    pub fn fail_fetches(&self, error: Option<TransportError>) {
        self.faults().fetch_error = error;
    }

    /// Number of `send_batch` calls so far.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Number of `fetch_since` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of open push subscriptions on a tree.
    pub fn subscriber_count(&self, tree_id: &str) -> usize {
        self.subscribers
            .iter()
            .filter(|s| s.tree_id == tree_id && !s.sender.is_closed())
            .count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_batch(&self, ops: Vec<Operation>) -> Result<Vec<Operation>, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);

        let plan = {
            let mut faults = self.faults();
            if faults.hold_sends {
                SendPlan::Hang
            } else if faults.offline {
                SendPlan::Fail(TransportError::network("offline"))
            } else if let Some(error) = faults.scripted.pop_front() {
                SendPlan::Fail(error)
            } else {
                SendPlan::Commit
            }
        };

        match plan {
            SendPlan::Hang => std::future::pending().await,
            SendPlan::Fail(error) => Err(error),
            SendPlan::Commit => {
                // The whole batch is refused if any row is malformed.
                for op in &ops {
                    if let Err(e) = validate_operation(op) {
                        return Err(TransportError::from_code(Some("22P02"), Some(400), e.to_string()));
                    }
                }

                let committed = self.commit(ops);
                self.broadcast(&committed);
                Ok(committed)
            }
        }
    }

    async fn fetch_since(
        &self,
        tree_id: &str,
        after: SequenceNumber,
    ) -> Result<Vec<Operation>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        {
            let faults = self.faults();
            if faults.offline {
                return Err(TransportError::network("offline"));
            }
            if let Some(error) = &faults.fetch_error {
                return Err(error.clone());
            }
        }

        Ok(self
            .log(tree_id)
            .into_iter()
            .filter(|op| op.sequence_number.is_some_and(|seq| seq > after))
            .collect())
    }

    async fn subscribe(&self, tree_id: &str) -> Result<OperationStream, TransportError> {
        if self.faults().offline {
            return Err(TransportError::network("offline"));
        }

        let (sender, receiver) = mpsc::unbounded();
        let sub_id = uuid::Uuid::new_v4().to_string();
        self.subscribers.insert(
            sub_id.clone(),
            Subscriber {
                tree_id: tree_id.to_string(),
                sender,
            },
        );
        tracing::info!(sub_id = %sub_id, tree_id = %tree_id, "Subscriber registered");

        Ok(receiver.boxed())
    }

    async fn subscribe_to_role(&self, tree_id: &str) -> Result<RoleStream, TransportError> {
        if self.faults().offline {
            return Err(TransportError::network("offline"));
        }

        let (sender, receiver) = mpsc::unbounded();
        if let Some(role) = self.roles.get(tree_id) {
            let _ = sender.unbounded_send(*role);
        }
        self.role_subscribers.insert(
            uuid::Uuid::new_v4().to_string(),
            Subscriber {
                tree_id: tree_id.to_string(),
                sender,
            },
        );

        Ok(receiver.boxed())
    }
}
