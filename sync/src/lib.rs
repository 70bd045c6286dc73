//! # Lineage Sync
//!
//! Delta synchronization for the Lineage family-tree graph.
//!
//! Local edits are applied optimistically, persisted to a durable queue and
//! sent to a central, strictly ordered operation log in debounced batches.
//! Committed operations from every collaborator come back through a realtime
//! push, are put in sequence order and folded into the confirmed graph.
//! Holes in the sequence and refused batches are repaired by reconciling with
//! the central log.
//!
//! The engine talks to the outside world through two traits:
//!
//! - [`DurableQueue`] - on-device persistence of pending operations and
//!   checkpoints
//! - [`Transport`] - the central log: batch commit, fetch, realtime push
//!
//! In-memory implementations of both live in [`memory`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use lineage_engine::{Change, Entity, RelationKind};
//! use lineage_sync::{MemoryQueue, MemoryTransport, SyncConfig, SyncEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! lineage_sync::logging::init();
//!
//! let handle = SyncEngine::new(
//!     "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f",
//!     "alice",
//!     MemoryQueue::new_shared(),
//!     MemoryTransport::new_shared(),
//! )
//! .with_config(SyncConfig::from_env()?)
//! .start()
//! .await?;
//!
//! handle.enqueue(Change::add_node(Entity::new("p1"))).await;
//! handle
//!     .enqueue(Change::add_related_node(Entity::new("p2"), "p1", RelationKind::Child))
//!     .await;
//!
//! let graph = handle.graph();
//! assert!(graph.is_consistent());
//! # Ok(())
//! # }
//! ```

pub mod config;
mod engine;
pub mod error;
pub mod events;
mod handle;
mod incoming;
pub mod logging;
pub mod memory;
mod outgoing;
mod reconcile;
pub mod role;
pub mod storage;
pub mod transport;

pub use config::{ConfigError, SyncConfig};
pub use engine::SyncEngine;
pub use error::{ErrorClass, Result, StorageError, SyncError, TransportError, TransportErrorKind};
pub use events::{SyncEvent, SyncStatus};
pub use handle::SyncHandle;
pub use memory::{MemoryQueue, MemoryTransport};
pub use role::{Role, RoleChannel};
pub use storage::DurableQueue;
pub use transport::{OperationStream, RoleStream, Transport};
