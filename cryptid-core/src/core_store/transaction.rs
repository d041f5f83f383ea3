//! Transactions over the identity graph
//!
//! A transaction works on a private copy of the graph. The copy
//! replaces the shared graph only when the closure returns Ok; any
//! error discards it wholesale. Nested transactions snapshot the
//! working copy the same way, so a failed inner step rolls back
//! without aborting the outer work.
//!
//! Notifications queue on the transaction and are handed back only on
//! commit, so observers never hear about discarded mutations.

use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::core_identity::{IdentityId, OwnedIdentity};
use crate::errors::{EngineResult, IdentityEngineError};
use crate::manager::Notification;

use super::{FlowId, IdentityGraph};

/// Serializes access to the shared identity graph
#[derive(Debug, Clone, Default)]
pub struct TransactionProvider {
    graph: Arc<RwLock<IdentityGraph>>,
}

impl TransactionProvider {
    pub fn new() -> Self {
        TransactionProvider::default()
    }

    /// Run `work` against a copy of the graph, committing on Ok and
    /// discarding on Err.
    pub fn run_in_transaction<T>(
        &self,
        flow_id: FlowId,
        work: impl FnOnce(&mut Transaction) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut guard = self.graph.write().map_err(|_| {
            IdentityEngineError::ConsistencyFault("identity graph lock poisoned".to_string())
        })?;
        let mut transaction = Transaction {
            flow_id,
            graph: guard.clone(),
            notifications: Vec::new(),
        };
        match work(&mut transaction) {
            Ok(value) => {
                *guard = transaction.graph;
                debug!(flow = %flow_id, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                warn!(flow = %flow_id, error = %err, "transaction discarded");
                Err(err)
            }
        }
    }
}

/// One unit of work against a private copy of the graph
#[derive(Debug)]
pub struct Transaction {
    flow_id: FlowId,
    graph: IdentityGraph,
    notifications: Vec<Notification>,
}

impl Transaction {
    /// The flow this transaction belongs to
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    /// Queue a notification for delivery after this transaction
    /// commits. Discarded along with the working copy on rollback.
    pub fn queue_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Hand over the queued notifications for delivery
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn owned(&self, identity: &IdentityId) -> EngineResult<&OwnedIdentity> {
        self.graph.owned(identity)
    }

    pub fn owned_mut(&mut self, identity: &IdentityId) -> EngineResult<&mut OwnedIdentity> {
        self.graph.owned_mut(identity)
    }

    pub fn insert_owned(&mut self, owned: OwnedIdentity) -> EngineResult<()> {
        self.graph.insert(owned)
    }

    pub fn remove_owned(&mut self, identity: &IdentityId) -> EngineResult<OwnedIdentity> {
        self.graph.remove(identity)
    }

    pub fn owned_ids(&self) -> Vec<IdentityId> {
        self.graph.owned_ids()
    }

    pub fn graph(&self) -> &IdentityGraph {
        &self.graph
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Run `work` as a nested step. On Err the working copy and any
    /// notifications queued by the step are restored to their state
    /// before it; the outer transaction stays usable either way.
    pub fn run_nested<T>(
        &mut self,
        work: impl FnOnce(&mut Transaction) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let snapshot = self.graph.clone();
        let queued = self.notifications.len();
        match work(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(flow = %self.flow_id, error = %err, "nested step rolled back");
                self.graph = snapshot;
                self.notifications.truncate(queued);
                Err(err)
            }
        }
    }
}
