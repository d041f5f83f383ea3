//! Owned identity aggregate
//!
//! The root entity of the engine. Everything the engine knows hangs
//! off an owned identity: its own key material and devices, its
//! contacts, every group it owns or joined, the optional keycloak
//! binding, and server-side user data bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core_crypto::Prng;
use crate::core_group::{GroupUid, JoinedGroup, OwnedGroup};
use crate::core_group_v2::{GroupIdentifier, GroupV2};
use crate::core_keycloak::{KeycloakServer, KeycloakState, RevocationKind, SignedUserDetails};
use crate::errors::{EngineResult, IdentityEngineError};

use super::{
    Capability, ContactIdentity, DetailsState, DeviceUid, IdentityDetails, IdentityId,
    OwnedCryptoIdentity, TrustOrigin,
};

/// Bookkeeping for one piece of user data pushed to the server
/// (photos and similar labeled uploads that expire unless refreshed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUserData {
    /// Server-side label of the uploaded data
    pub label: Vec<u8>,
    /// When the upload must be refreshed next (unix seconds)
    pub next_refresh_timestamp: u64,
}

/// A photo the engine references but has not downloaded yet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PhotoDownloadNeed {
    OwnedDetails {
        version: u32,
    },
    Contact {
        contact: IdentityId,
        version: u32,
    },
    OwnedGroup {
        uid: GroupUid,
        version: u32,
    },
    JoinedGroup {
        uid: GroupUid,
        owner: IdentityId,
        version: u32,
    },
    GroupV2 {
        identifier: GroupIdentifier,
    },
}

/// One owned identity and everything scoped to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedIdentity {
    /// Key material and server of this identity
    pub crypto: OwnedCryptoIdentity,
    /// API key used against the identity's server
    pub api_key: Uuid,
    /// Cleared when the server deactivated this identity
    pub is_active: bool,
    /// Device this engine instance runs on
    pub current_device: DeviceUid,
    /// Other devices of the same identity
    pub other_devices: BTreeSet<DeviceUid>,
    /// Capabilities of this identity
    pub capabilities: BTreeSet<Capability>,
    /// Published details, possibly with a pending edit
    pub details: DetailsState<IdentityDetails>,
    /// Keycloak-signed details of the owned identity itself
    pub signed_user_details: Option<SignedUserDetails>,
    /// Present when the identity is keycloak managed
    pub keycloak: Option<KeycloakServer>,
    /// Contacts keyed by their identity id
    pub contacts: BTreeMap<IdentityId, ContactIdentity>,
    /// Groups this identity owns (V1)
    pub groups_owned: BTreeMap<GroupUid, OwnedGroup>,
    /// Groups this identity joined (V1), keyed by (uid, owner)
    pub groups_joined: BTreeMap<(GroupUid, IdentityId), JoinedGroup>,
    /// Groups V2 this identity participates in
    pub groups_v2: BTreeMap<GroupIdentifier, GroupV2>,
    /// Labeled server uploads awaiting periodic refresh
    pub server_user_data: BTreeMap<Vec<u8>, ServerUserData>,
}

impl OwnedIdentity {
    /// Generate a fresh owned identity on the given server
    pub fn generate(
        server_url: &str,
        details: IdentityDetails,
        api_key: Uuid,
        prng: &mut dyn Prng,
    ) -> Self {
        let crypto = OwnedCryptoIdentity::generate(server_url, prng);
        let current_device = DeviceUid::generate(prng);
        info!(identity = %crypto.id(), device = %current_device, "generated owned identity");
        OwnedIdentity {
            crypto,
            api_key,
            is_active: true,
            current_device,
            other_devices: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            details: DetailsState::new(details),
            signed_user_details: None,
            keycloak: None,
            contacts: BTreeMap::new(),
            groups_owned: BTreeMap::new(),
            groups_joined: BTreeMap::new(),
            groups_v2: BTreeMap::new(),
            server_user_data: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> IdentityId {
        self.crypto.id()
    }

    pub fn is_keycloak_managed(&self) -> bool {
        self.keycloak.is_some()
    }

    // ---- contacts ----

    pub fn contact(&self, identity: &IdentityId) -> EngineResult<&ContactIdentity> {
        self.contacts
            .get(identity)
            .ok_or(IdentityEngineError::ContactIdentityNotFound)
    }

    pub fn contact_mut(&mut self, identity: &IdentityId) -> EngineResult<&mut ContactIdentity> {
        self.contacts
            .get_mut(identity)
            .ok_or(IdentityEngineError::ContactIdentityNotFound)
    }

    /// Insert a new contact. Fails when one already exists for the
    /// same crypto identity; callers wanting merge semantics use
    /// [`add_contact_or_trust_origin`](Self::add_contact_or_trust_origin).
    pub fn add_contact(&mut self, contact: ContactIdentity) -> EngineResult<()> {
        let id = contact.id();
        if self.contacts.contains_key(&id) {
            return Err(IdentityEngineError::ContactIdentityAlreadyExists);
        }
        debug!(owned = %self.id(), contact = %id, "adding contact");
        self.contacts.insert(id, contact);
        Ok(())
    }

    /// Insert the contact, or record the trust origin on the existing
    /// one. Returns true when a new contact was created.
    pub fn add_contact_or_trust_origin(
        &mut self,
        contact: ContactIdentity,
        trust_origin: TrustOrigin,
    ) -> bool {
        match self.contacts.get_mut(&contact.id()) {
            Some(existing) => {
                existing.add_trust_origin(trust_origin);
                false
            }
            None => {
                self.contacts.insert(contact.id(), contact);
                true
            }
        }
    }

    /// Whether any group (V1 owned, V1 joined, or V2) references the
    /// identity as member or pending member
    pub fn contact_belongs_to_some_group(&self, identity: &IdentityId) -> bool {
        self.groups_owned.values().any(|g| g.references(identity))
            || self.groups_joined.values().any(|g| g.references(identity))
            || self.groups_v2.values().any(|g| g.references(identity))
    }

    /// Delete a contact. With `fail_if_contact_part_of_common_group`
    /// set, the deletion is rejected while any group still references
    /// the contact; without it, deletion proceeds regardless.
    pub fn delete_contact(
        &mut self,
        identity: &IdentityId,
        fail_if_contact_part_of_common_group: bool,
    ) -> EngineResult<()> {
        if !self.contacts.contains_key(identity) {
            return Err(IdentityEngineError::ContactIdentityNotFound);
        }
        if fail_if_contact_part_of_common_group && self.contact_belongs_to_some_group(identity) {
            return Err(IdentityEngineError::ContactStillMemberOfCommonGroup);
        }
        info!(owned = %self.id(), contact = %identity, "deleting contact");
        self.contacts.remove(identity);
        Ok(())
    }

    // ---- own devices ----

    /// Record another device of this identity (idempotent).
    /// Returns true when inserted.
    pub fn add_other_device_if_absent(&mut self, uid: DeviceUid) -> bool {
        if uid == self.current_device {
            return false;
        }
        self.other_devices.insert(uid)
    }

    pub fn remove_other_device_if_present(&mut self, uid: &DeviceUid) -> bool {
        self.other_devices.remove(uid)
    }

    /// All device uids, current device first
    pub fn all_devices(&self) -> Vec<DeviceUid> {
        let mut devices = vec![self.current_device];
        devices.extend(self.other_devices.iter().copied());
        devices
    }

    // ---- keycloak binding ----

    /// Bind (or re-bind) this identity to a keycloak server. The
    /// self-revocation test nonce of a previous binding is preserved;
    /// it only changes through
    /// [`set_self_revocation_test_nonce`](Self::set_self_revocation_test_nonce).
    pub fn bind_keycloak(&mut self, state: KeycloakState, user_id: &str) {
        let preserved_nonce = self
            .keycloak
            .take()
            .and_then(|previous| previous.self_revocation_test_nonce);
        let mut server = KeycloakServer::new(state, user_id);
        server.self_revocation_test_nonce = preserved_nonce;
        info!(owned = %self.id(), server = %server.server_url, "binding to keycloak server");
        self.keycloak = Some(server);
        self.recompute_contact_certifications();
    }

    /// Detach from the keycloak server. Signed details become
    /// meaningless without the binding and are dropped; contacts lose
    /// their certified-by-own-keycloak status.
    pub fn unbind_keycloak(&mut self) -> EngineResult<()> {
        if self.keycloak.take().is_none() {
            return Err(IdentityEngineError::OwnedIdentityIsNotKeycloakManaged);
        }
        info!(owned = %self.id(), "unbinding from keycloak server");
        self.signed_user_details = None;
        for contact in self.contacts.values_mut() {
            contact.is_certified_by_own_keycloak = false;
        }
        Ok(())
    }

    pub fn keycloak(&self) -> EngineResult<&KeycloakServer> {
        self.keycloak
            .as_ref()
            .ok_or(IdentityEngineError::OwnedIdentityIsNotKeycloakManaged)
    }

    pub fn keycloak_mut(&mut self) -> EngineResult<&mut KeycloakServer> {
        self.keycloak
            .as_mut()
            .ok_or(IdentityEngineError::OwnedIdentityIsNotKeycloakManaged)
    }

    pub fn set_self_revocation_test_nonce(&mut self, nonce: Option<String>) -> EngineResult<()> {
        self.keycloak_mut()?.self_revocation_test_nonce = nonce;
        Ok(())
    }

    /// Replace the bound server's signature verification key and
    /// re-derive every contact's certification status against it.
    /// Returns the contacts whose status changed.
    pub fn set_keycloak_signature_verification_key(
        &mut self,
        key: Option<Vec<u8>>,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let owned_id = self.crypto.id();
        let server = self.keycloak_mut()?;
        info!(owned = %owned_id, server = %server.server_url, "keycloak signature verification key replaced");
        server.signature_verification_key = key;
        Ok(self.recompute_contact_certifications())
    }

    /// Cache the opaque auth-state blob of the bound server
    pub fn save_keycloak_auth_state(&mut self, raw_auth_state: Option<Vec<u8>>) -> EngineResult<()> {
        self.keycloak_mut()?.raw_auth_state = raw_auth_state;
        Ok(())
    }

    /// Cache the JWKS blob of the bound server
    pub fn save_keycloak_jwks(&mut self, jwks: Option<Vec<u8>>) -> EngineResult<()> {
        self.keycloak_mut()?.jwks = jwks;
        Ok(())
    }

    /// Verify a batch of signed revocations against the bound server
    /// and apply them. Contacts revoked as compromised lose their
    /// devices and active status (unless forcefully trusted); any
    /// revoked contact loses certification. Entries older than the
    /// safety window below `latest_timestamp` are pruned afterwards.
    ///
    /// Returns the contacts newly marked compromised.
    pub fn verify_and_add_revocation_list(
        &mut self,
        signed_revocations: &[String],
        latest_timestamp: u64,
        signature_validity_secs: u64,
    ) -> EngineResult<BTreeSet<IdentityId>> {
        let server = self
            .keycloak
            .as_mut()
            .ok_or(IdentityEngineError::OwnedIdentityIsNotKeycloakManaged)?;
        let accepted = server.add_verified_revocations(signed_revocations);
        server.latest_revocation_list_timestamp = Some(latest_timestamp);
        server.prune_old_revocations(signature_validity_secs);

        let mut compromised = BTreeSet::new();
        for payload in accepted {
            let contact = match self.contacts.get_mut(&payload.identity) {
                Some(contact) => contact,
                None => continue,
            };
            contact.is_certified_by_own_keycloak = false;
            contact.keycloak_signed_details = None;
            if payload.kind == RevocationKind::Compromised && !contact.is_revoked_as_compromised {
                info!(owned = %self.crypto.id(), contact = %payload.identity, "contact revoked as compromised");
                contact.is_revoked_as_compromised = true;
                contact.devices.clear();
                compromised.insert(payload.identity);
            }
        }
        Ok(compromised)
    }

    /// Re-derive `is_certified_by_own_keycloak` for every contact
    /// from its signed details and the bound server's key. Returns
    /// the contacts whose certification status changed.
    pub fn recompute_contact_certifications(&mut self) -> BTreeSet<IdentityId> {
        let key = self
            .keycloak
            .as_ref()
            .and_then(|server| server.signature_verification_key.clone());
        let mut changed = BTreeSet::new();
        for (id, contact) in &mut self.contacts {
            let certified = match (&key, &contact.keycloak_signed_details) {
                (Some(key), Some(details)) => details.verify(key),
                _ => false,
            };
            if contact.is_certified_by_own_keycloak != certified {
                contact.is_certified_by_own_keycloak = certified;
                changed.insert(*id);
            }
        }
        changed
    }

    /// Drop certification from contacts whose signed details expired.
    /// Returns the contacts that lost certification.
    pub fn uncertify_expired_contacts(
        &mut self,
        now: u64,
        signature_validity_secs: u64,
    ) -> BTreeSet<IdentityId> {
        let mut uncertified = BTreeSet::new();
        for (id, contact) in &mut self.contacts {
            if !contact.is_certified_by_own_keycloak {
                continue;
            }
            let expired = match &contact.keycloak_signed_details {
                Some(details) => details.is_expired(now, signature_validity_secs),
                None => true,
            };
            if expired {
                contact.is_certified_by_own_keycloak = false;
                uncertified.insert(*id);
            }
        }
        uncertified
    }

    /// Enumerate every photo still awaiting download: the owned
    /// details photo, contact photos (trusted and published records),
    /// group photos across all three group kinds.
    pub fn photo_downloads_needed(&self) -> Vec<PhotoDownloadNeed> {
        let mut needed = Vec::new();

        if self.details.published().photo_needs_download() {
            needed.push(PhotoDownloadNeed::OwnedDetails {
                version: self.details.published().version,
            });
        }

        for (id, contact) in &self.contacts {
            if contact.details.trusted.photo_needs_download() {
                needed.push(PhotoDownloadNeed::Contact {
                    contact: *id,
                    version: contact.details.trusted.version,
                });
            }
            if let Some(published) = &contact.details.published {
                if published.photo_needs_download() {
                    needed.push(PhotoDownloadNeed::Contact {
                        contact: *id,
                        version: published.version,
                    });
                }
            }
        }

        for (uid, group) in &self.groups_owned {
            if group.details.published().photo_needs_download() {
                needed.push(PhotoDownloadNeed::OwnedGroup {
                    uid: *uid,
                    version: group.details.published().version,
                });
            }
        }

        for ((uid, owner), group) in &self.groups_joined {
            if group.details.trusted.photo_needs_download() {
                needed.push(PhotoDownloadNeed::JoinedGroup {
                    uid: *uid,
                    owner: *owner,
                    version: group.details.trusted.version,
                });
            }
            if let Some(published) = &group.details.published {
                if published.photo_needs_download() {
                    needed.push(PhotoDownloadNeed::JoinedGroup {
                        uid: *uid,
                        owner: *owner,
                        version: published.version,
                    });
                }
            }
        }

        for (identifier, group) in &self.groups_v2 {
            if let Some(info) = &group.server_photo_info {
                if group.photo_needs_download(info) {
                    needed.push(PhotoDownloadNeed::GroupV2 {
                        identifier: identifier.clone(),
                    });
                }
            }
        }

        needed
    }

    // ---- server user data ----

    /// Record a labeled server upload with its refresh deadline
    pub fn record_server_user_data(&mut self, label: Vec<u8>, next_refresh_timestamp: u64) {
        self.server_user_data.insert(
            label.clone(),
            ServerUserData {
                label,
                next_refresh_timestamp,
            },
        );
    }

    /// Labels whose refresh deadline has passed
    pub fn server_user_data_due(&self, now: u64) -> Vec<Vec<u8>> {
        self.server_user_data
            .values()
            .filter(|data| data.next_refresh_timestamp <= now)
            .map(|data| data.label.clone())
            .collect()
    }

    /// Push the refresh deadline of one label. Unknown labels are
    /// removed server-side by the caller, so this is a no-op for them.
    pub fn bump_server_user_data(&mut self, label: &[u8], next_refresh_timestamp: u64) {
        if let Some(data) = self.server_user_data.get_mut(label) {
            data.next_refresh_timestamp = next_refresh_timestamp;
        }
    }

    pub fn forget_server_user_data(&mut self, label: &[u8]) -> bool {
        self.server_user_data.remove(label).is_some()
    }
}
