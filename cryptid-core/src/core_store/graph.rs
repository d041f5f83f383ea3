//! Identity graph
//!
//! The complete engine state: every owned identity with its contacts,
//! groups and keycloak binding. Entities are self-contained, so the
//! graph itself is a flat map.

use serde::{Deserialize, Serialize};

use crate::core_identity::{IdentityId, OwnedIdentity};
use crate::errors::{EngineResult, IdentityEngineError};
use std::collections::BTreeMap;

/// All owned identities known to this engine instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityGraph {
    identities: BTreeMap<IdentityId, OwnedIdentity>,
}

impl IdentityGraph {
    pub fn new() -> Self {
        IdentityGraph::default()
    }

    pub fn owned(&self, identity: &IdentityId) -> EngineResult<&OwnedIdentity> {
        self.identities
            .get(identity)
            .ok_or(IdentityEngineError::OwnedIdentityNotFound)
    }

    pub fn owned_mut(&mut self, identity: &IdentityId) -> EngineResult<&mut OwnedIdentity> {
        self.identities
            .get_mut(identity)
            .ok_or(IdentityEngineError::OwnedIdentityNotFound)
    }

    /// Insert a freshly created owned identity. A collision means two
    /// distinct key generations produced the same id, which cannot
    /// happen without a corrupted store.
    pub fn insert(&mut self, owned: OwnedIdentity) -> EngineResult<()> {
        let id = owned.id();
        if self.identities.contains_key(&id) {
            return Err(IdentityEngineError::ConsistencyFault(format!(
                "owned identity {} already present",
                id
            )));
        }
        self.identities.insert(id, owned);
        Ok(())
    }

    pub fn remove(&mut self, identity: &IdentityId) -> EngineResult<OwnedIdentity> {
        self.identities
            .remove(identity)
            .ok_or(IdentityEngineError::OwnedIdentityNotFound)
    }

    pub fn owned_ids(&self) -> Vec<IdentityId> {
        self.identities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IdentityId, &OwnedIdentity)> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
