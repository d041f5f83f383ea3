//! Group V2 entity
//!
//! Local state of one Group V2: the last consolidated blob content,
//! the keys protecting it, the trusted/published detail pair, and the
//! freeze flag protecting against lost updates while a server-side
//! consolidation is pending.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core_group::GroupDetails;
use crate::core_identity::{IdentityId, RemoteDetails};
use crate::errors::{EngineResult, IdentityEngineError};

use super::{
    AdministratorsChain, BlobKeys, GroupIdentifier, GroupMemberEntry, ServerBlob, ServerPhotoInfo,
};

/// A Group V2 as known to one owned identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupV2 {
    /// Structured identifier
    pub identifier: GroupIdentifier,
    /// Monotonically increasing group version
    pub version: u64,
    /// Material to decrypt/authenticate the server blob
    pub blob_keys: BlobKeys,
    /// Trusted vs published detail pair
    pub details: RemoteDetails<GroupDetails>,
    /// Set while a server-side consolidation is pending
    pub frozen: bool,
    /// The local identity's own invitation nonce within this group
    pub own_invitation_nonce: Vec<u8>,
    /// Invitation nonces already consumed by a protocol run
    pub used_invitation_nonces: BTreeSet<Vec<u8>>,
    /// Other members and pending members
    pub members: Vec<GroupMemberEntry>,
    /// Authority lineage
    pub administrators_chain: AdministratorsChain,
    /// Optional server-side photo reference
    pub server_photo_info: Option<ServerPhotoInfo>,
    /// Local photo filename once downloaded
    pub photo_filename: Option<String>,
}

impl GroupV2 {
    /// Build local state from a blob (creation as admin or joiner)
    pub fn from_blob(
        identifier: GroupIdentifier,
        blob: ServerBlob,
        blob_keys: BlobKeys,
        own_identity: IdentityId,
    ) -> EngineResult<Self> {
        blob.validate()?;
        let own_invitation_nonce = blob
            .members
            .iter()
            .find(|m| m.id() == own_identity)
            .map(|m| m.invitation_nonce.clone())
            .ok_or_else(|| {
                IdentityEngineError::ConsistencyFault(
                    "own identity missing from group blob".to_string(),
                )
            })?;
        let members = blob
            .members
            .into_iter()
            .filter(|m| m.id() != own_identity)
            .collect();
        Ok(GroupV2 {
            identifier,
            version: blob.version,
            blob_keys,
            details: RemoteDetails::new(blob.details.details.clone()),
            frozen: false,
            own_invitation_nonce,
            used_invitation_nonces: BTreeSet::new(),
            members,
            administrators_chain: blob.administrators_chain,
            server_photo_info: blob.server_photo_info,
            photo_filename: None,
        })
    }

    fn ensure_not_frozen(&self) -> EngineResult<()> {
        if self.frozen {
            return Err(IdentityEngineError::GroupIsFrozen);
        }
        Ok(())
    }

    /// Block local mutation while a server-side update is pending
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Allow local mutation again
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Replace local state with the server's consolidated view.
    ///
    /// Enforces version monotonicity and lineage continuity, then
    /// swaps membership, chain, keys and details wholesale. Returns
    /// the identities whose entries were inserted or changed, so the
    /// caller can drive downstream notifications.
    pub fn apply_consolidated_blob(
        &mut self,
        new_blob_keys: BlobKeys,
        blob: ServerBlob,
        updated_by_owner: bool,
        own_identity: IdentityId,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        blob.validate()?;
        if blob.version < self.version {
            return Err(IdentityEngineError::VersionConflict {
                stored: self.version,
                incoming: blob.version,
            });
        }
        if !self.administrators_chain.shares_lineage_with(&blob.administrators_chain) {
            return Err(IdentityEngineError::ConsistencyFault(
                "administrators chain lineage mismatch".to_string(),
            ));
        }

        let mut touched = BTreeSet::new();
        for entry in blob.members.iter().filter(|m| m.id() != own_identity) {
            let known = self.members.iter().find(|m| m.id() == entry.id());
            if known != Some(entry) {
                touched.insert(entry.id());
            }
        }

        if let Some(own) = blob.members.iter().find(|m| m.id() == own_identity) {
            self.own_invitation_nonce = own.invitation_nonce.clone();
        }
        self.members = blob
            .members
            .into_iter()
            .filter(|m| m.id() != own_identity)
            .collect();
        self.version = blob.version;
        self.blob_keys = new_blob_keys;
        self.administrators_chain = blob.administrators_chain;
        self.server_photo_info = blob.server_photo_info;

        // Nonces rotate with the blob; usage marks on retired nonces
        // are meaningless and dropped.
        let own_nonce = self.own_invitation_nonce.clone();
        let mut used = std::mem::take(&mut self.used_invitation_nonces);
        used.retain(|nonce| {
            *nonce == own_nonce || self.members.iter().any(|m| m.invitation_nonce == *nonce)
        });
        self.used_invitation_nonces = used;

        self.details.update_published(blob.details, true)?;
        if updated_by_owner {
            self.details.trust_published();
        }

        // The pending consolidation landed; local mutation may resume.
        self.frozen = false;
        Ok(touched)
    }

    /// Remove members or pending members. Rejected while frozen.
    pub fn remove_members(&mut self, identities: &BTreeSet<IdentityId>) -> EngineResult<()> {
        self.ensure_not_frozen()?;
        self.members.retain(|m| !identities.contains(&m.id()));
        Ok(())
    }

    /// Move a pending member to confirmed membership. Rejected while
    /// frozen; the identity must currently be pending.
    pub fn move_pending_to_member(&mut self, identity: IdentityId) -> EngineResult<()> {
        self.ensure_not_frozen()?;
        let entry = self
            .members
            .iter_mut()
            .find(|m| m.id() == identity && m.is_pending)
            .ok_or(IdentityEngineError::NotAPendingMember)?;
        entry.is_pending = false;
        Ok(())
    }

    /// Record that an invitation nonce was consumed by a protocol
    /// run. The nonce must belong to this group. Returns true on
    /// first use, false when it was already marked.
    pub fn mark_invitation_nonce_used(&mut self, nonce: &[u8]) -> EngineResult<bool> {
        let known = self.own_invitation_nonce == nonce
            || self.members.iter().any(|m| m.invitation_nonce == nonce);
        if !known {
            return Err(IdentityEngineError::NotAGroupMember);
        }
        Ok(self.used_invitation_nonces.insert(nonce.to_vec()))
    }

    /// All other members and pending members
    pub fn other_members(&self) -> &[GroupMemberEntry] {
        &self.members
    }

    /// Non-pending members holding the GroupAdmin permission
    pub fn non_pending_administrators(&self) -> BTreeSet<IdentityId> {
        self.members
            .iter()
            .filter(|m| !m.is_pending && m.permissions.contains(&super::Permission::GroupAdmin))
            .map(|m| m.id())
            .collect()
    }

    /// Whether the identity appears as a member or pending member
    pub fn references(&self, identity: &IdentityId) -> bool {
        self.members.iter().any(|m| m.id() == *identity)
    }

    /// Whether the photo referenced by `info` still needs downloading
    pub fn photo_needs_download(&self, info: &ServerPhotoInfo) -> bool {
        self.server_photo_info.as_ref() == Some(info) && self.photo_filename.is_none()
    }
}
