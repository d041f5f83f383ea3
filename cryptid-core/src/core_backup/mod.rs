//! Engine state backup and restore
//!
//! The backup payload is a versioned JSON snapshot of every owned
//! identity with all state hanging off it. Restore is strict: it only
//! runs into an empty store, only accepts exactly one owned identity,
//! and re-validates the payload in a second pass before anything is
//! inserted. Derived fields (trust levels, certification flags) are
//! recomputed rather than trusted from the payload.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BACKUP_SCHEMA_VERSION;
use crate::core_identity::{IdentityId, OwnedIdentity, TrustLevel};
use crate::core_store::Transaction;
use crate::errors::{EngineResult, IdentityEngineError};

/// Where a backup payload originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupDataSource {
    /// Produced by the engine itself
    Engine,
    /// Produced by the application layer
    App,
}

/// One module's contribution to a full backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalBackupData {
    /// The serialized payload
    pub json: String,
    /// Names the module the payload belongs to
    pub identifier: String,
    pub source: BackupDataSource,
}

/// Versioned snapshot of the whole identity graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub schema_version: u32,
    pub identities: Vec<OwnedIdentity>,
}

/// Serialize the full engine state. Fails when no owned identity
/// exists; an empty backup would silently restore to nothing.
pub fn export_snapshot(transaction: &Transaction) -> EngineResult<String> {
    if transaction.is_empty() {
        return Err(IdentityEngineError::OwnedIdentityNotFound);
    }
    let snapshot = BackupSnapshot {
        schema_version: BACKUP_SCHEMA_VERSION,
        identities: transaction
            .graph()
            .iter()
            .map(|(_, owned)| owned.clone())
            .collect(),
    };
    info!(
        flow = %transaction.flow_id(),
        identities = snapshot.identities.len(),
        "exporting engine backup"
    );
    Ok(serde_json::to_string(&snapshot)?)
}

/// Engine contribution to a full application backup
pub fn provide_internal_data_for_backup(
    transaction: &Transaction,
) -> EngineResult<InternalBackupData> {
    Ok(InternalBackupData {
        json: export_snapshot(transaction)?,
        identifier: "identity_manager".to_string(),
        source: BackupDataSource::Engine,
    })
}

/// Restore a backup payload into an empty store.
///
/// Pass one parses and checks the envelope; pass two re-validates
/// entity consistency and recomputes derived state. Nothing is
/// inserted unless both passes succeed, and the surrounding
/// transaction discards the insert if a later step fails.
pub fn restore_snapshot(transaction: &mut Transaction, json: &str) -> EngineResult<IdentityId> {
    if !transaction.is_empty() {
        return Err(IdentityEngineError::RestoreRequiresEmptyStore);
    }

    let snapshot: BackupSnapshot = serde_json::from_str(json)
        .map_err(|e| IdentityEngineError::InvalidBackupPayload(e.to_string()))?;
    if snapshot.schema_version != BACKUP_SCHEMA_VERSION {
        return Err(IdentityEngineError::InvalidBackupPayload(format!(
            "unsupported schema version {}",
            snapshot.schema_version
        )));
    }
    if snapshot.identities.len() != 1 {
        return Err(IdentityEngineError::BackupMustContainExactlyOneOwnedIdentity(
            snapshot.identities.len(),
        ));
    }

    let mut owned = snapshot.identities.into_iter().next().ok_or_else(|| {
        IdentityEngineError::InvalidBackupPayload("missing owned identity".to_string())
    })?;
    validate_restored_identity(&owned)?;
    recompute_derived_state(&mut owned);

    let id = owned.id();
    info!(flow = %transaction.flow_id(), identity = %id, "restoring owned identity from backup");
    transaction.insert_owned(owned)?;
    Ok(id)
}

/// Structural consistency checks over a restored identity
fn validate_restored_identity(owned: &OwnedIdentity) -> EngineResult<()> {
    for group in owned.groups_owned.values() {
        if group.members.iter().any(|id| group.pending.contains_key(id)) {
            return Err(IdentityEngineError::InvalidBackupPayload(format!(
                "group {} has overlapping member and pending sets",
                group.uid
            )));
        }
    }
    for ((uid, owner), group) in &owned.groups_joined {
        if group.uid != *uid || group.owner != *owner {
            return Err(IdentityEngineError::InvalidBackupPayload(
                "joined group stored under a mismatched key".to_string(),
            ));
        }
    }
    for (identifier, group) in &owned.groups_v2 {
        if group.identifier != *identifier {
            return Err(IdentityEngineError::InvalidBackupPayload(
                "group stored under a mismatched identifier".to_string(),
            ));
        }
        group
            .administrators_chain
            .validate()
            .map_err(|e| IdentityEngineError::InvalidBackupPayload(e.to_string()))?;
    }
    for (id, contact) in &owned.contacts {
        if contact.id() != *id {
            return Err(IdentityEngineError::InvalidBackupPayload(
                "contact stored under a mismatched identity".to_string(),
            ));
        }
        if contact.trust_origins.is_empty() {
            return Err(IdentityEngineError::InvalidBackupPayload(format!(
                "contact {} has no trust origin",
                id
            )));
        }
    }
    Ok(())
}

/// Recompute everything derivable instead of trusting the payload
fn recompute_derived_state(owned: &mut OwnedIdentity) {
    for contact in owned.contacts.values_mut() {
        contact.trust_level = TrustLevel::from_origins(&contact.trust_origins);
    }
    owned.recompute_contact_certifications();
}
