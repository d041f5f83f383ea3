//! Owned Group V1 entity
//!
//! Invariant maintained by every mutator: an identity never appears
//! in both the member set and the pending set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core_identity::{DetailsState, IdentityId};
use crate::errors::{EngineResult, IdentityEngineError};

use super::{GroupDetails, GroupUid};

/// A pending member entry of an owned group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMember {
    /// Whether the invitee declined the invitation
    pub declined: bool,
}

/// A Group V1 owned by the local identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedGroup {
    /// Group identifier (the owner is the local identity)
    pub uid: GroupUid,
    /// Published/latest detail pair (two-phase editing)
    pub details: DetailsState<GroupDetails>,
    /// Confirmed members
    pub members: BTreeSet<IdentityId>,
    /// Invited identities that have not joined yet
    pub pending: BTreeMap<IdentityId, PendingMember>,
    /// Version of the member/pending partition, bumped on each change
    pub group_members_version: u64,
}

impl OwnedGroup {
    pub fn new(uid: GroupUid, details: GroupDetails, pending: BTreeSet<IdentityId>) -> Self {
        OwnedGroup {
            uid,
            details: DetailsState::new(details),
            members: BTreeSet::new(),
            pending: pending
                .into_iter()
                .map(|id| (id, PendingMember { declined: false }))
                .collect(),
            group_members_version: 0,
        }
    }

    fn check_disjoint(&self) -> EngineResult<()> {
        if self.members.iter().any(|id| self.pending.contains_key(id)) {
            return Err(IdentityEngineError::ConsistencyFault(format!(
                "group {} has an identity in both members and pending",
                self.uid
            )));
        }
        Ok(())
    }

    /// Add pending members, skipping identities already present as
    /// members or pending members. Returns the identities actually
    /// added.
    pub fn add_pending_members(
        &mut self,
        identities: BTreeSet<IdentityId>,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let mut added = BTreeSet::new();
        for id in identities {
            if self.members.contains(&id) || self.pending.contains_key(&id) {
                continue;
            }
            self.pending.insert(id, PendingMember { declined: false });
            added.insert(id);
        }
        if !added.is_empty() {
            self.group_members_version += 1;
        }
        self.check_disjoint()?;
        Ok(added)
    }

    /// Remove any identities present as members or pending members.
    /// Returns the identities actually removed.
    pub fn remove_pending_and_members(
        &mut self,
        identities: &BTreeSet<IdentityId>,
    ) -> BTreeSet<IdentityId> {
        let mut removed = BTreeSet::new();
        for id in identities {
            let was_member = self.members.remove(id);
            let was_pending = self.pending.remove(id).is_some();
            if was_member || was_pending {
                removed.insert(*id);
            }
        }
        if !removed.is_empty() {
            self.group_members_version += 1;
        }
        removed
    }

    /// Promote a pending member to a confirmed member
    pub fn transfer_pending_to_member(&mut self, identity: IdentityId) -> EngineResult<()> {
        if self.pending.remove(&identity).is_none() {
            return Err(IdentityEngineError::NotAPendingMember);
        }
        self.members.insert(identity);
        self.group_members_version += 1;
        self.check_disjoint()
    }

    /// Demote a member back to a pending member marked declined
    /// (used when a member leaves the group)
    pub fn transfer_member_to_pending_declined(&mut self, identity: IdentityId) -> EngineResult<()> {
        if !self.members.remove(&identity) {
            return Err(IdentityEngineError::NotAGroupMember);
        }
        self.pending.insert(identity, PendingMember { declined: true });
        self.group_members_version += 1;
        self.check_disjoint()
    }

    /// Mark or unmark a pending member as declined
    pub fn set_pending_member_declined(
        &mut self,
        identity: &IdentityId,
        declined: bool,
    ) -> EngineResult<()> {
        match self.pending.get_mut(identity) {
            Some(entry) => {
                entry.declined = declined;
                Ok(())
            }
            None => Err(IdentityEngineError::NotAPendingMember),
        }
    }

    /// Whether the group holds no members and no pending members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.pending.is_empty()
    }

    /// Whether the identity appears as a member or a pending member
    pub fn references(&self, identity: &IdentityId) -> bool {
        self.members.contains(identity) || self.pending.contains_key(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdentityId {
        IdentityId::from_bytes([byte; 32])
    }

    fn group() -> OwnedGroup {
        OwnedGroup::new(
            GroupUid::from_bytes([1u8; 32]),
            GroupDetails::new("hiking"),
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_pending_and_members_stay_disjoint() {
        let mut group = group();
        group
            .add_pending_members([id(1), id(2)].into_iter().collect())
            .unwrap();
        group.transfer_pending_to_member(id(1)).unwrap();

        // Re-inviting a member is silently skipped
        let added = group
            .add_pending_members([id(1), id(3)].into_iter().collect())
            .unwrap();
        assert_eq!(added, [id(3)].into_iter().collect());
        assert!(group.members.contains(&id(1)));
        assert!(!group.pending.contains_key(&id(1)));
    }

    #[test]
    fn test_transfer_pending_to_member_requires_pending() {
        let mut group = group();
        assert!(matches!(
            group.transfer_pending_to_member(id(1)),
            Err(IdentityEngineError::NotAPendingMember)
        ));
    }

    #[test]
    fn test_member_leaving_becomes_declined_pending() {
        let mut group = group();
        group
            .add_pending_members([id(1)].into_iter().collect())
            .unwrap();
        group.transfer_pending_to_member(id(1)).unwrap();

        group.transfer_member_to_pending_declined(id(1)).unwrap();
        assert!(group.pending[&id(1)].declined);
        assert!(!group.members.contains(&id(1)));
    }

    #[test]
    fn test_decline_mark_and_revert() {
        let mut group = group();
        group
            .add_pending_members([id(4)].into_iter().collect())
            .unwrap();
        group.set_pending_member_declined(&id(4), true).unwrap();
        assert!(group.pending[&id(4)].declined);
        group.set_pending_member_declined(&id(4), false).unwrap();
        assert!(!group.pending[&id(4)].declined);

        assert!(group.set_pending_member_declined(&id(5), true).is_err());
    }

    #[test]
    fn test_remove_covers_both_sets() {
        let mut group = group();
        group
            .add_pending_members([id(1), id(2)].into_iter().collect())
            .unwrap();
        group.transfer_pending_to_member(id(1)).unwrap();

        let removed = group.remove_pending_and_members(&[id(1), id(2), id(9)].into_iter().collect());
        assert_eq!(removed, [id(1), id(2)].into_iter().collect());
        assert!(group.is_empty());
    }
}
