//! Joined Group V1 entity
//!
//! Mirrors owner-authored group information. The member/pending lists
//! are replaced wholesale by the owner; a local watermark makes the
//! replacement idempotent against replays and reordering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core_identity::{IdentityId, RemoteDetails, VersionedDetails};
use crate::errors::EngineResult;

use super::{GroupDetails, GroupUid};

/// A Group V1 owned by a remote identity and joined locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedGroup {
    /// Group identifier
    pub uid: GroupUid,
    /// The group owner's identity
    pub owner: IdentityId,
    /// Trusted and published detail records (trust step mirrors contacts)
    pub details: RemoteDetails<GroupDetails>,
    /// Confirmed members as last announced by the owner
    pub members: BTreeSet<IdentityId>,
    /// Pending members as last announced by the owner
    pub pending: BTreeSet<IdentityId>,
    /// Watermark of the last accepted member/pending announcement
    pub group_members_version: u64,
}

impl JoinedGroup {
    pub fn new(
        uid: GroupUid,
        owner: IdentityId,
        details: GroupDetails,
        pending: BTreeSet<IdentityId>,
    ) -> Self {
        JoinedGroup {
            uid,
            owner,
            details: RemoteDetails::new(details),
            members: BTreeSet::new(),
            pending,
            group_members_version: 0,
        }
    }

    /// Accept owner-authored published details when validly newer.
    /// Signature validity is the protocol layer's concern; this core
    /// only enforces the version guard.
    pub fn update_published_details(
        &mut self,
        new: VersionedDetails<GroupDetails>,
    ) -> EngineResult<bool> {
        self.details.update_published(new, false)
    }

    /// Replace both lists wholesale with a newer announcement. A
    /// watermark lower than or equal to the stored one is a no-op.
    /// Returns true when the lists were replaced.
    pub fn update_pending_members_and_group_members(
        &mut self,
        members: BTreeSet<IdentityId>,
        pending: BTreeSet<IdentityId>,
        group_members_version: u64,
    ) -> bool {
        if group_members_version <= self.group_members_version {
            return false;
        }
        self.members = members;
        self.pending = pending;
        self.group_members_version = group_members_version;
        true
    }

    /// Whether the identity appears as a member or a pending member
    pub fn references(&self, identity: &IdentityId) -> bool {
        self.members.contains(identity) || self.pending.contains(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdentityId {
        IdentityId::from_bytes([byte; 32])
    }

    fn group() -> JoinedGroup {
        JoinedGroup::new(
            GroupUid::from_bytes([2u8; 32]),
            id(1),
            GroupDetails::new("book club"),
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_watermark_guard_is_idempotent() {
        let mut group = group();
        let members: BTreeSet<_> = [id(2), id(3)].into_iter().collect();
        let pending: BTreeSet<_> = [id(4)].into_iter().collect();

        assert!(group.update_pending_members_and_group_members(
            members.clone(),
            pending.clone(),
            5
        ));
        assert_eq!(group.group_members_version, 5);

        // Same watermark: no-op, state unchanged
        assert!(!group.update_pending_members_and_group_members(
            BTreeSet::new(),
            BTreeSet::new(),
            5
        ));
        assert_eq!(group.members, members);

        // Lower watermark: no-op as well
        assert!(!group.update_pending_members_and_group_members(
            BTreeSet::new(),
            BTreeSet::new(),
            3
        ));
        assert_eq!(group.pending, pending);

        // Strictly newer watermark wins
        assert!(group.update_pending_members_and_group_members(
            BTreeSet::new(),
            BTreeSet::new(),
            6
        ));
        assert!(group.members.is_empty());
    }

    #[test]
    fn test_published_details_version_guard() {
        let mut group = group();
        let mut v1 = VersionedDetails::initial(GroupDetails::new("renamed"));
        v1.version = 1;
        assert!(group.update_published_details(v1).unwrap());

        let v0 = VersionedDetails::initial(GroupDetails::new("stale"));
        assert!(group.update_published_details(v0).is_err());
    }

    #[test]
    fn test_trust_published_details() {
        let mut group = group();
        let mut v2 = VersionedDetails::initial(GroupDetails::new("renamed"));
        v2.version = 2;
        group.update_published_details(v2).unwrap();
        assert!(group.details.trust_published());
        assert_eq!(group.details.trusted.details.name, "renamed");
    }
}
