//! Permission channel.
//!
//! The caller's role on a tree can change while the tree is open (the owner
//! revokes edit rights, say). The channel listens on its own subscription and
//! has its own lifecycle, so a failure here never touches the operation
//! pipelines.

use crate::{events::SyncEvent, transport::Transport};
use futures::StreamExt;
use lineage_engine::TreeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Access level of the current user on a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    /// Whether the role allows editing the tree.
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Owner | Role::Editor)
    }
}

/// Background listener for role updates.
#[derive(Debug)]
pub struct RoleChannel {
    task: JoinHandle<()>,
}

impl RoleChannel {
    /// Subscribe to role updates for a tree. Each update replaces the value in
    /// `role` and is announced as [`SyncEvent::RoleChanged`].
    pub fn start(
        transport: Arc<dyn Transport>,
        tree_id: TreeId,
        role: watch::Sender<Option<Role>>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut updates = match transport.subscribe_to_role(&tree_id).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(tree_id = %tree_id, error = %e, "Role subscription failed");
                    return;
                }
            };
            tracing::debug!(tree_id = %tree_id, "Role channel subscribed");

            while let Some(next) = updates.next().await {
                tracing::info!(tree_id = %tree_id, role = ?next, "Role changed");
                role.send_replace(Some(next));
                let _ = events.send(SyncEvent::RoleChanged(next));
            }

            tracing::debug!(tree_id = %tree_id, "Role channel closed");
        });

        Self { task }
    }

    /// Unsubscribe.
    pub fn stop(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Editor).unwrap(), r#""editor""#);
        let role: Role = serde_json::from_str(r#""viewer""#).unwrap();
        assert_eq!(role, Role::Viewer);
        assert!(!role.can_edit());
        assert!(Role::Owner.can_edit());
    }
}
