//! Identity manager façade
//!
//! The single entry point the embedding application talks to. Every
//! method runs against a caller-provided transaction, so one
//! higher-level operation can span several calls and still commit or
//! roll back as a unit. Backup entry points are the exception: they
//! open their own transaction keyed by a flow id.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core_backup;
use crate::core_backup::InternalBackupData;
use crate::core_crypto::{derive_deterministic_seed, Prng, Seed};
use crate::core_group::{GroupDetails, GroupUid, JoinedGroup, OwnedGroup};
use crate::core_group_v2::{
    AdministratorsChain, BlobKeys, GroupIdentifier, GroupMemberEntry, GroupV2, GroupV2Category,
    Permission, ServerBlob, INVITATION_NONCE_LENGTH,
};
use crate::core_identity::{
    Capability, ContactIdentity, CryptoIdentity, DetailsEdit, DeviceUid, IdentityDetails,
    IdentityId, OwnedIdentity, PhotoDownloadNeed, PhotoServerKeyAndLabel, TrustOrigin,
    VersionedDetails,
};
use crate::core_keycloak::{KeycloakState, SignedUserDetails};
use crate::core_store::{FlowId, Transaction, TransactionProvider};
use crate::errors::{EngineResult, IdentityEngineError};

use super::delegates::{EngineDelegates, Notification};

/// The identity and trust management core
pub struct IdentityManager {
    provider: TransactionProvider,
    delegates: EngineDelegates,
    config: EngineConfig,
}

impl IdentityManager {
    pub fn new(config: EngineConfig, delegates: EngineDelegates) -> Self {
        IdentityManager {
            provider: TransactionProvider::new(),
            delegates,
            config,
        }
    }

    /// Run work inside one transaction tied to a flow. Notifications
    /// queued during the work reach the sink only after the commit; a
    /// discarded transaction emits nothing.
    pub fn run_in_transaction<T>(
        &self,
        flow_id: FlowId,
        work: impl FnOnce(&mut Transaction) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let (value, notifications) = self.provider.run_in_transaction(flow_id, |tx| {
            let value = work(tx)?;
            Ok((value, tx.take_notifications()))
        })?;
        for notification in notifications {
            self.delegates.notifications.post(notification);
        }
        Ok(value)
    }

    // ---- owned identities ----

    /// Generate a fresh owned identity, optionally keycloak managed
    /// from the start.
    pub fn generate_owned_identity(
        &self,
        transaction: &mut Transaction,
        server_url: &str,
        details: IdentityDetails,
        api_key: Option<Uuid>,
        keycloak: Option<(KeycloakState, String)>,
        prng: &mut dyn Prng,
    ) -> EngineResult<IdentityId> {
        let mut owned = OwnedIdentity::generate(
            server_url,
            details,
            api_key.unwrap_or_else(Uuid::new_v4),
            prng,
        );
        if let Some((state, user_id)) = keycloak {
            owned.bind_keycloak(state, &user_id);
        }
        let id = owned.id();
        transaction.insert_owned(owned)?;
        transaction.queue_notification(Notification::OwnedIdentityGenerated { owned: id });
        Ok(id)
    }

    pub fn owned_identities(&self, transaction: &Transaction) -> Vec<IdentityId> {
        transaction.owned_ids()
    }

    pub fn owned_identity(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
    ) -> EngineResult<OwnedIdentity> {
        Ok(transaction.owned(owned)?.clone())
    }

    pub fn delete_owned_identity(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
    ) -> EngineResult<()> {
        transaction.remove_owned(owned)?;
        transaction.queue_notification(Notification::OwnedIdentityDeleted { owned: *owned });
        Ok(())
    }

    pub fn set_api_key(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        api_key: Uuid,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.api_key = api_key;
        Ok(())
    }

    /// Activation is server-driven: the engine only records it
    pub fn set_owned_identity_active(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        is_active: bool,
    ) -> EngineResult<()> {
        let identity = transaction.owned_mut(owned)?;
        if identity.is_active != is_active {
            info!(owned = %owned, is_active, "owned identity active flag changed");
            identity.is_active = is_active;
        }
        Ok(())
    }

    pub fn set_owned_capabilities(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        capabilities: BTreeSet<Capability>,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.capabilities = capabilities;
        Ok(())
    }

    pub fn add_owned_device(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        device: DeviceUid,
    ) -> EngineResult<bool> {
        Ok(transaction.owned_mut(owned)?.add_other_device_if_absent(device))
    }

    pub fn remove_owned_device(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        device: &DeviceUid,
    ) -> EngineResult<bool> {
        Ok(transaction.owned_mut(owned)?.remove_other_device_if_present(device))
    }

    /// Record a local edit of the owned identity's details
    pub fn update_owned_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        edit: DetailsEdit<IdentityDetails>,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.details.set_latest(edit);
        Ok(())
    }

    /// Publish the pending detail edit. Returns true when a new
    /// version went out.
    pub fn publish_owned_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
    ) -> EngineResult<bool> {
        Ok(transaction.owned_mut(owned)?.details.publish())
    }

    pub fn discard_owned_details_edit(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.details.discard();
        Ok(())
    }

    /// Store photo bytes for the owned identity and attach them to a
    /// detail edit (starting one when none is in progress).
    pub fn set_owned_photo(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        bytes: &[u8],
    ) -> EngineResult<String> {
        let filename = self.delegates.photos.store(owned, b"owned_details", bytes)?;
        let identity = transaction.owned_mut(owned)?;
        let edit = match identity.details.latest() {
            Some(latest) => DetailsEdit {
                details: latest.details.clone(),
                photo_filename: Some(filename.clone()),
                photo_server_key_and_label: None,
            },
            None => DetailsEdit {
                details: identity.details.published().details.clone(),
                photo_filename: Some(filename.clone()),
                photo_server_key_and_label: None,
            },
        };
        identity.details.set_latest(edit);
        Ok(filename)
    }

    /// Record the server-side key/label the published owned photo was
    /// uploaded under
    pub fn set_owned_photo_server_key_and_label(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        key_and_label: PhotoServerKeyAndLabel,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .details
            .set_photo_server_key_and_label(key_and_label);
        Ok(())
    }

    /// Store downloaded owned-identity photo bytes and attach the
    /// filename to the published record awaiting them. The version
    /// guard runs before the bytes are stored, so a rejected update
    /// never leaves a file behind.
    pub fn update_owned_downloaded_photo(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        version: u32,
        bytes: &[u8],
    ) -> EngineResult<()> {
        transaction
            .owned(owned)?
            .details
            .check_awaiting_photo(version)?;
        let filename = self.delegates.photos.store(owned, b"owned_details", bytes)?;
        transaction
            .owned_mut(owned)?
            .details
            .update_downloaded_photo(version, filename)
    }

    /// Derive the deterministic seed bound to this identity and the
    /// given diversification data. Same input, same seed, forever.
    pub fn deterministic_seed(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
        diversification: &[u8],
    ) -> EngineResult<Seed> {
        if diversification.is_empty() {
            return Err(IdentityEngineError::DiversificationDataCannotBeEmpty);
        }
        let identity = transaction.owned(owned)?;
        Ok(derive_deterministic_seed(
            identity.crypto.mac_key(),
            diversification,
        )?)
    }

    /// Sign a server challenge as the owned identity
    pub fn sign_challenge(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
        challenge: &[u8],
    ) -> EngineResult<Vec<u8>> {
        Ok(transaction.owned(owned)?.crypto.sign(challenge)?)
    }

    // ---- contacts ----

    pub fn add_contact(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        crypto: CryptoIdentity,
        details: IdentityDetails,
        trust_origin: TrustOrigin,
        is_one_to_one: bool,
    ) -> EngineResult<IdentityId> {
        let contact = ContactIdentity::new(crypto, details, trust_origin, is_one_to_one);
        let contact_id = contact.id();
        transaction.owned_mut(owned)?.add_contact(contact)?;
        transaction.queue_notification(Notification::ContactAdded {
            owned: *owned,
            contact: contact_id,
        });
        Ok(contact_id)
    }

    /// Record a further trust origin on an existing contact
    pub fn add_trust_origin(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        trust_origin: TrustOrigin,
    ) -> EngineResult<()> {
        let increased = {
            let entry = transaction.owned_mut(owned)?.contact_mut(contact)?;
            entry.add_trust_origin(trust_origin).then(|| entry.trust_level)
        };
        if let Some(trust_level) = increased {
            transaction.queue_notification(Notification::ContactTrustLevelIncreased {
                owned: *owned,
                contact: *contact,
                trust_level,
            });
        }
        Ok(())
    }

    pub fn contact(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
    ) -> EngineResult<ContactIdentity> {
        Ok(transaction.owned(owned)?.contact(contact)?.clone())
    }

    pub fn delete_contact(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        fail_if_contact_part_of_common_group: bool,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .delete_contact(contact, fail_if_contact_part_of_common_group)?;
        transaction.queue_notification(Notification::ContactDeleted {
            owned: *owned,
            contact: *contact,
        });
        Ok(())
    }

    pub fn set_contact_one_to_one(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        is_one_to_one: bool,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .is_one_to_one = is_one_to_one;
        Ok(())
    }

    /// User override keeping a revoked contact usable
    pub fn set_contact_forcefully_trusted(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        is_forcefully_trusted: bool,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .is_forcefully_trusted = is_forcefully_trusted;
        Ok(())
    }

    pub fn update_contact_published_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        details: VersionedDetails<IdentityDetails>,
    ) -> EngineResult<bool> {
        transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .details
            .update_published(details, false)
    }

    pub fn trust_contact_published_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .details
            .trust_published())
    }

    /// Store downloaded contact photo bytes and attach the filename
    /// to the detail record awaiting them. The version guard runs
    /// before the bytes are stored, so a rejected update never leaves
    /// a file behind.
    pub fn update_contact_downloaded_photo(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        version: u32,
        bytes: &[u8],
    ) -> EngineResult<()> {
        transaction
            .owned(owned)?
            .contact(contact)?
            .details
            .check_awaiting_photo(version)?;
        let filename = self
            .delegates
            .photos
            .store(owned, contact.as_bytes(), bytes)?;
        transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .details
            .update_downloaded_photo(version, filename)
    }

    /// Every photo of the owned identity, its contacts and its groups
    /// that still has to be fetched from the server
    pub fn photos_needing_download(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
    ) -> EngineResult<Vec<PhotoDownloadNeed>> {
        Ok(transaction.owned(owned)?.photo_downloads_needed())
    }

    pub fn add_contact_device(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        device: DeviceUid,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .add_device_if_absent(device))
    }

    pub fn remove_contact_device(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        device: &DeviceUid,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .remove_device_if_present(device))
    }

    pub fn set_contact_device_capabilities(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        device: &DeviceUid,
        capabilities: BTreeSet<Capability>,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .contact_mut(contact)?
            .set_device_capabilities(device, capabilities))
    }

    // ---- groups (V1) ----

    fn ensure_active_contacts(
        identity: &OwnedIdentity,
        members: &BTreeSet<IdentityId>,
    ) -> EngineResult<()> {
        for member in members {
            match identity.contacts.get(member) {
                Some(contact) if contact.is_active() => {}
                _ => return Err(IdentityEngineError::PendingMemberIsNotAnActiveContact),
            }
        }
        Ok(())
    }

    /// Create a group owned by the local identity. Every initial
    /// pending member must be an active contact.
    pub fn create_owned_group(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        details: GroupDetails,
        pending_members: BTreeSet<IdentityId>,
        prng: &mut dyn Prng,
    ) -> EngineResult<GroupUid> {
        let identity = transaction.owned_mut(owned)?;
        Self::ensure_active_contacts(identity, &pending_members)?;
        let uid = GroupUid::generate(prng);
        if identity.groups_owned.contains_key(&uid) {
            return Err(IdentityEngineError::GroupAlreadyExists);
        }
        identity
            .groups_owned
            .insert(uid, OwnedGroup::new(uid, details, pending_members));
        info!(owned = %owned, group = %uid, "created owned group");
        transaction.queue_notification(Notification::GroupCreated {
            owned: *owned,
            group: uid,
        });
        Ok(uid)
    }

    /// Delete an owned group. Only an empty group can go away; the
    /// protocol has to kick everyone out first.
    pub fn delete_owned_group(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
    ) -> EngineResult<()> {
        let identity = transaction.owned_mut(owned)?;
        let entry = identity
            .groups_owned
            .get(group)
            .ok_or(IdentityEngineError::GroupNotFound)?;
        if !entry.is_empty() {
            return Err(IdentityEngineError::OwnedContactGroupStillHasMembersOrPendingMembers);
        }
        identity.groups_owned.remove(group);
        transaction.queue_notification(Notification::GroupDeleted {
            owned: *owned,
            group: *group,
        });
        Ok(())
    }

    pub fn add_pending_members_to_owned_group(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        members: BTreeSet<IdentityId>,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let identity = transaction.owned_mut(owned)?;
        Self::ensure_active_contacts(identity, &members)?;
        let entry = identity
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?;
        let added = entry.add_pending_members(members)?;
        if !added.is_empty() {
            transaction.queue_notification(Notification::GroupMembersChanged {
                owned: *owned,
                group: *group,
            });
        }
        Ok(added)
    }

    pub fn remove_members_from_owned_group(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        members: &BTreeSet<IdentityId>,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let entry = transaction
            .owned_mut(owned)?
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?;
        let removed = entry.remove_pending_and_members(members);
        if !removed.is_empty() {
            transaction.queue_notification(Notification::GroupMembersChanged {
                owned: *owned,
                group: *group,
            });
        }
        Ok(removed)
    }

    /// Promote a pending member who accepted the invitation. The
    /// member must still be an active contact.
    pub fn confirm_pending_member(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        member: IdentityId,
    ) -> EngineResult<()> {
        let identity = transaction.owned_mut(owned)?;
        Self::ensure_active_contacts(identity, &[member].into_iter().collect())?;
        identity
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?
            .transfer_pending_to_member(member)?;
        transaction.queue_notification(Notification::GroupMembersChanged {
            owned: *owned,
            group: *group,
        });
        Ok(())
    }

    /// A member left: back to pending, marked declined
    pub fn demote_member_to_declined(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        member: IdentityId,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?
            .transfer_member_to_pending_declined(member)?;
        transaction.queue_notification(Notification::GroupMembersChanged {
            owned: *owned,
            group: *group,
        });
        Ok(())
    }

    pub fn set_pending_member_declined(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        member: &IdentityId,
        declined: bool,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?
            .set_pending_member_declined(member, declined)
    }

    pub fn update_owned_group_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        edit: DetailsEdit<GroupDetails>,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?
            .details
            .set_latest(edit);
        Ok(())
    }

    pub fn publish_owned_group_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?
            .details
            .publish())
    }

    /// Record the server-side key/label the published group photo was
    /// uploaded under (propagation to a pending edit follows the
    /// same-photo rule of the detail state machine)
    pub fn set_owned_group_photo_server_key_and_label(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        group: &GroupUid,
        key_and_label: PhotoServerKeyAndLabel,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .groups_owned
            .get_mut(group)
            .ok_or(IdentityEngineError::GroupNotFound)?
            .details
            .set_photo_server_key_and_label(key_and_label);
        Ok(())
    }

    /// Record a group created by a contact that invited us. The owner
    /// must already be a contact.
    pub fn create_joined_group(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        uid: GroupUid,
        group_owner: IdentityId,
        details: GroupDetails,
        pending: BTreeSet<IdentityId>,
    ) -> EngineResult<()> {
        let identity = transaction.owned_mut(owned)?;
        identity.contact(&group_owner)?;
        if identity.groups_joined.contains_key(&(uid, group_owner)) {
            return Err(IdentityEngineError::GroupAlreadyExists);
        }
        identity.groups_joined.insert(
            (uid, group_owner),
            JoinedGroup::new(uid, group_owner, details, pending),
        );
        info!(owned = %owned, group = %uid, owner = %group_owner, "joined group recorded");
        transaction.queue_notification(Notification::GroupCreated {
            owned: *owned,
            group: uid,
        });
        Ok(())
    }

    /// Leave (or be removed from) a joined group
    pub fn delete_joined_group(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        uid: &GroupUid,
        group_owner: &IdentityId,
    ) -> EngineResult<()> {
        let identity = transaction.owned_mut(owned)?;
        if identity.groups_joined.remove(&(*uid, *group_owner)).is_none() {
            return Err(IdentityEngineError::GroupNotFound);
        }
        transaction.queue_notification(Notification::GroupDeleted {
            owned: *owned,
            group: *uid,
        });
        Ok(())
    }

    /// Apply an owner announcement of the member/pending lists.
    /// Returns true when the lists changed (the watermark guard makes
    /// replays a silent no-op).
    pub fn update_joined_group_members(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        uid: &GroupUid,
        group_owner: &IdentityId,
        members: BTreeSet<IdentityId>,
        pending: BTreeSet<IdentityId>,
        group_members_version: u64,
    ) -> EngineResult<bool> {
        let entry = transaction
            .owned_mut(owned)?
            .groups_joined
            .get_mut(&(*uid, *group_owner))
            .ok_or(IdentityEngineError::GroupNotFound)?;
        let changed =
            entry.update_pending_members_and_group_members(members, pending, group_members_version);
        if changed {
            transaction.queue_notification(Notification::GroupMembersChanged {
                owned: *owned,
                group: *uid,
            });
        }
        Ok(changed)
    }

    pub fn update_joined_group_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        uid: &GroupUid,
        group_owner: &IdentityId,
        details: VersionedDetails<GroupDetails>,
    ) -> EngineResult<bool> {
        transaction
            .owned_mut(owned)?
            .groups_joined
            .get_mut(&(*uid, *group_owner))
            .ok_or(IdentityEngineError::GroupNotFound)?
            .update_published_details(details)
    }

    pub fn trust_joined_group_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        uid: &GroupUid,
        group_owner: &IdentityId,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .groups_joined
            .get_mut(&(*uid, *group_owner))
            .ok_or(IdentityEngineError::GroupNotFound)?
            .details
            .trust_published())
    }

    // ---- groups (V2) ----

    /// Create a Group V2 with the local identity as first
    /// administrator. Members are recorded pending until they accept.
    pub fn create_group_v2(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        server_url: &str,
        category: GroupV2Category,
        details: GroupDetails,
        members: Vec<(CryptoIdentity, BTreeSet<Permission>)>,
        prng: &mut dyn Prng,
    ) -> EngineResult<GroupIdentifier> {
        let identity = transaction.owned_mut(owned)?;

        let mut administrators = vec![identity.crypto.signing_keypair().public_key().to_vec()];
        for (member, permissions) in &members {
            if permissions.contains(&Permission::GroupAdmin) {
                administrators.push(member.signing_public_key.clone());
            }
        }
        let chain = AdministratorsChain::genesis(identity.crypto.signing_keypair(), administrators)?;

        let mut entries = vec![GroupMemberEntry {
            identity: identity.crypto.public_identity(),
            permissions: [Permission::GroupAdmin, Permission::SendMessage]
                .into_iter()
                .collect(),
            invitation_nonce: prng.bytes(INVITATION_NONCE_LENGTH),
            is_pending: false,
        }];
        for (member, permissions) in members {
            entries.push(GroupMemberEntry {
                identity: member,
                permissions,
                invitation_nonce: prng.bytes(INVITATION_NONCE_LENGTH),
                is_pending: true,
            });
        }

        let blob = ServerBlob {
            version: 0,
            details: VersionedDetails::initial(details),
            members: entries,
            administrators_chain: chain,
            server_photo_info: None,
        };
        let blob_keys = BlobKeys::generate_for_administrator(prng);
        let identifier = GroupIdentifier::new(GroupUid::generate(prng), server_url, category);
        if identity.groups_v2.contains_key(&identifier) {
            return Err(IdentityEngineError::GroupAlreadyExists);
        }
        let group = GroupV2::from_blob(identifier.clone(), blob, blob_keys, *owned)?;
        identity.groups_v2.insert(identifier.clone(), group);
        info!(owned = %owned, group = %identifier, "created group v2");
        transaction.queue_notification(Notification::GroupV2Created {
            owned: *owned,
            group: identifier.clone(),
        });
        Ok(identifier)
    }

    /// Join a Group V2 from a sealed server blob. Known contacts
    /// appearing in the group gain a server-group trust origin.
    pub fn join_group_v2(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: GroupIdentifier,
        sealed_blob: &[u8],
        blob_keys: BlobKeys,
        timestamp: u64,
    ) -> EngineResult<()> {
        let blob = ServerBlob::open(sealed_blob, &blob_keys)?;
        let identity = transaction.owned_mut(owned)?;
        if identity.groups_v2.contains_key(&identifier) {
            return Err(IdentityEngineError::GroupAlreadyExists);
        }
        let group = GroupV2::from_blob(identifier.clone(), blob, blob_keys, *owned)?;

        let member_ids: Vec<IdentityId> = group.other_members().iter().map(|m| m.id()).collect();
        for member in member_ids {
            if let Some(contact) = identity.contacts.get_mut(&member) {
                contact.add_trust_origin(TrustOrigin::ServerGroupV2 {
                    raw_group_identifier: identifier.raw_bytes(),
                    timestamp,
                });
            }
        }

        identity.groups_v2.insert(identifier.clone(), group);
        info!(owned = %owned, group = %identifier, "joined group v2");
        transaction.queue_notification(Notification::GroupV2Created {
            owned: *owned,
            group: identifier,
        });
        Ok(())
    }

    fn group_v2_mut<'t>(
        transaction: &'t mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
    ) -> EngineResult<&'t mut GroupV2> {
        transaction
            .owned_mut(owned)?
            .groups_v2
            .get_mut(identifier)
            .ok_or(IdentityEngineError::GroupV2NotFound)
    }

    /// Freeze the group while a server-side consolidation is pending
    pub fn freeze_group_v2(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
    ) -> EngineResult<()> {
        Self::group_v2_mut(transaction, owned, identifier)?.freeze();
        Ok(())
    }

    pub fn unfreeze_group_v2(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
    ) -> EngineResult<()> {
        Self::group_v2_mut(transaction, owned, identifier)?.unfreeze();
        Ok(())
    }

    /// Apply a consolidated blob fetched from the server. Runs as a
    /// nested step: a rejected blob leaves the group exactly as it
    /// was, without aborting the surrounding transaction.
    pub fn update_group_v2(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
        sealed_blob: &[u8],
        new_blob_keys: BlobKeys,
        updated_by_owner: bool,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let owned = *owned;
        let identifier = identifier.clone();
        let touched = transaction.run_nested(|tx| {
            let blob = ServerBlob::open(sealed_blob, &new_blob_keys)?;
            Self::group_v2_mut(tx, &owned, &identifier)?.apply_consolidated_blob(
                new_blob_keys,
                blob,
                updated_by_owner,
                owned,
            )
        })?;
        transaction.queue_notification(Notification::GroupV2Updated {
            owned,
            group: identifier,
            touched_members: touched.len(),
        });
        Ok(touched)
    }

    pub fn remove_group_v2_members(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
        members: &BTreeSet<IdentityId>,
    ) -> EngineResult<()> {
        Self::group_v2_mut(transaction, owned, identifier)?.remove_members(members)
    }

    pub fn move_group_v2_pending_to_member(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
        member: IdentityId,
    ) -> EngineResult<()> {
        Self::group_v2_mut(transaction, owned, identifier)?.move_pending_to_member(member)
    }

    /// Record that one of the group's invitation nonces was consumed
    /// by a protocol run. Returns true on first use.
    pub fn mark_group_v2_invitation_nonce_used(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
        nonce: &[u8],
    ) -> EngineResult<bool> {
        Self::group_v2_mut(transaction, owned, identifier)?.mark_invitation_nonce_used(nonce)
    }

    pub fn delete_group_v2(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        identifier: &GroupIdentifier,
    ) -> EngineResult<()> {
        let identity = transaction.owned_mut(owned)?;
        if identity.groups_v2.remove(identifier).is_none() {
            return Err(IdentityEngineError::GroupV2NotFound);
        }
        transaction.queue_notification(Notification::GroupV2Deleted {
            owned: *owned,
            group: identifier.clone(),
        });
        Ok(())
    }

    // ---- keycloak ----

    pub fn bind_owned_identity_to_keycloak(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        state: KeycloakState,
        user_id: &str,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.bind_keycloak(state, user_id);
        Ok(())
    }

    pub fn unbind_owned_identity_from_keycloak(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.unbind_keycloak()
    }

    pub fn set_keycloak_self_revocation_test_nonce(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        nonce: Option<String>,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .set_self_revocation_test_nonce(nonce)
    }

    pub fn keycloak_self_revocation_test_nonce(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
    ) -> EngineResult<Option<String>> {
        Ok(transaction
            .owned(owned)?
            .keycloak()?
            .self_revocation_test_nonce
            .clone())
    }

    /// Replace the bound server's signature verification key. Every
    /// contact's certification is re-derived against the new key;
    /// returns the contacts whose status changed.
    pub fn set_keycloak_signature_verification_key(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        key: Option<Vec<u8>>,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        transaction
            .owned_mut(owned)?
            .set_keycloak_signature_verification_key(key)
    }

    /// Cache the opaque auth-state blob handed back by the server
    pub fn save_keycloak_auth_state(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        raw_auth_state: Option<Vec<u8>>,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .save_keycloak_auth_state(raw_auth_state)
    }

    /// Cache the JWKS blob fetched from the server
    pub fn save_keycloak_jwks(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        jwks: Option<Vec<u8>>,
    ) -> EngineResult<()> {
        transaction.owned_mut(owned)?.save_keycloak_jwks(jwks)
    }

    /// Replace the keycloak push-topic set. Returns whether it changed.
    pub fn update_keycloak_push_topics(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        push_topics: BTreeSet<String>,
    ) -> EngineResult<bool> {
        Ok(transaction
            .owned_mut(owned)?
            .keycloak_mut()?
            .update_push_topics(push_topics))
    }

    /// Verify and apply a signed revocation list from the bound
    /// keycloak server. Returns the contacts newly marked compromised.
    pub fn verify_and_add_keycloak_revocations(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        signed_revocations: &[String],
        latest_timestamp: u64,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let validity = self.config.keycloak_signature_validity.as_secs();
        let compromised = transaction.owned_mut(owned)?.verify_and_add_revocation_list(
            signed_revocations,
            latest_timestamp,
            validity,
        )?;
        for contact in &compromised {
            transaction.queue_notification(Notification::ContactRevokedAsCompromised {
                owned: *owned,
                contact: *contact,
            });
        }
        Ok(compromised)
    }

    /// Install keycloak-signed details on a contact and re-derive its
    /// certification status. Invalid signatures simply leave the
    /// contact uncertified.
    pub fn set_contact_keycloak_signed_details(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        contact: &IdentityId,
        signed_details: SignedUserDetails,
    ) -> EngineResult<bool> {
        let identity = transaction.owned_mut(owned)?;
        identity.contact_mut(contact)?.keycloak_signed_details = Some(signed_details);
        identity.recompute_contact_certifications();
        Ok(identity.contact(contact)?.is_certified_by_own_keycloak)
    }

    /// Periodic sweep: drop certification from contacts whose signed
    /// details fell out of the validity window.
    pub fn uncertify_expired_contacts(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        now: u64,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let validity = self.config.keycloak_signature_validity.as_secs();
        Ok(transaction
            .owned_mut(owned)?
            .uncertify_expired_contacts(now, validity))
    }

    // ---- server user data ----

    pub fn record_server_user_data(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        label: Vec<u8>,
        next_refresh_timestamp: u64,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .record_server_user_data(label, next_refresh_timestamp);
        Ok(())
    }

    pub fn server_user_data_due(
        &self,
        transaction: &Transaction,
        owned: &IdentityId,
        now: u64,
    ) -> EngineResult<Vec<Vec<u8>>> {
        Ok(transaction.owned(owned)?.server_user_data_due(now))
    }

    pub fn refresh_server_user_data(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        label: &[u8],
        next_refresh_timestamp: u64,
    ) -> EngineResult<()> {
        transaction
            .owned_mut(owned)?
            .bump_server_user_data(label, next_refresh_timestamp);
        Ok(())
    }

    pub fn forget_server_user_data(
        &self,
        transaction: &mut Transaction,
        owned: &IdentityId,
        label: &[u8],
    ) -> EngineResult<bool> {
        Ok(transaction.owned_mut(owned)?.forget_server_user_data(label))
    }

    // ---- backup ----

    /// Engine contribution to a full application backup
    pub fn provide_internal_data_for_backup(
        &self,
        flow_id: FlowId,
    ) -> EngineResult<InternalBackupData> {
        self.run_in_transaction(flow_id, |tx| core_backup::provide_internal_data_for_backup(tx))
    }

    pub fn export_backup(&self, flow_id: FlowId) -> EngineResult<String> {
        self.run_in_transaction(flow_id, |tx| core_backup::export_snapshot(tx))
    }

    /// Restore a backup payload. Only valid into an empty store.
    pub fn restore_backup(&self, flow_id: FlowId, json: &str) -> EngineResult<IdentityId> {
        self.run_in_transaction(flow_id, |tx| {
            let restored = core_backup::restore_snapshot(tx, json)?;
            tx.queue_notification(Notification::BackupRestored {
                flow: flow_id,
                owned: restored,
            });
            Ok(restored)
        })
    }

    /// Delegates, for embeddings that need direct photo access
    pub fn photos(&self) -> Arc<dyn super::delegates::PhotoStore> {
        Arc::clone(&self.delegates.photos)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
