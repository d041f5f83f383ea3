//! Contact identity entity
//!
//! A remote identity known to one owned identity. Carries how trust
//! was established, what the contact advertises about itself, its
//! devices, and its keycloak certification status.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core_keycloak::SignedUserDetails;

use super::{
    Capability, CryptoIdentity, DeviceUid, IdentityDetails, IdentityId, RemoteDetails,
    TrustLevel, TrustOrigin, VersionedDetails,
};

/// A contact identity, unique per (owned identity, crypto identity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactIdentity {
    /// Public crypto identity of the contact
    pub crypto: CryptoIdentity,
    /// How trust was established, in recording order
    pub trust_origins: Vec<TrustOrigin>,
    /// Derived trust level (max over origins, never decreases)
    pub trust_level: TrustLevel,
    /// Whether the contact is a one-to-one contact
    pub is_one_to_one: bool,
    /// Set when a keycloak revocation marked the contact compromised
    pub is_revoked_as_compromised: bool,
    /// User override keeping a revoked contact usable
    pub is_forcefully_trusted: bool,
    /// Known devices and their capability sets
    pub devices: BTreeMap<DeviceUid, BTreeSet<Capability>>,
    /// Capabilities of the contact itself
    pub capabilities: BTreeSet<Capability>,
    /// Trusted and published detail records
    pub details: RemoteDetails<IdentityDetails>,
    /// Keycloak-signed details, when the contact is certified
    pub keycloak_signed_details: Option<SignedUserDetails>,
    /// Derived: certified by the owned identity's own keycloak server
    pub is_certified_by_own_keycloak: bool,
}

impl ContactIdentity {
    /// Create a contact from its first trust origin
    pub fn new(
        crypto: CryptoIdentity,
        core_details: IdentityDetails,
        trust_origin: TrustOrigin,
        is_one_to_one: bool,
    ) -> Self {
        let trust_level = trust_origin.trust_level();
        ContactIdentity {
            crypto,
            trust_origins: vec![trust_origin],
            trust_level,
            is_one_to_one,
            is_revoked_as_compromised: false,
            is_forcefully_trusted: false,
            devices: BTreeMap::new(),
            capabilities: BTreeSet::new(),
            details: RemoteDetails::new(core_details),
            keycloak_signed_details: None,
            is_certified_by_own_keycloak: false,
        }
    }

    /// Stable identifier of the contact's crypto identity
    pub fn id(&self) -> IdentityId {
        self.crypto.id()
    }

    /// Record an additional trust origin. The trust level is
    /// recomputed as the maximum over all origins; it never
    /// decreases. Returns true when the level increased.
    pub fn add_trust_origin(&mut self, trust_origin: TrustOrigin) -> bool {
        self.trust_origins.push(trust_origin);
        let recomputed = TrustLevel::from_origins(&self.trust_origins);
        if recomputed > self.trust_level {
            self.trust_level = recomputed;
            true
        } else {
            false
        }
    }

    /// A revoked contact stays active only while forcefully trusted
    pub fn is_active(&self) -> bool {
        !self.is_revoked_as_compromised || self.is_forcefully_trusted
    }

    /// Add a device if absent (idempotent). Returns true when inserted.
    pub fn add_device_if_absent(&mut self, uid: DeviceUid) -> bool {
        if self.devices.contains_key(&uid) {
            return false;
        }
        self.devices.insert(uid, BTreeSet::new());
        true
    }

    /// Remove a device if present (idempotent). Returns true when removed.
    pub fn remove_device_if_present(&mut self, uid: &DeviceUid) -> bool {
        self.devices.remove(uid).is_some()
    }

    /// Replace the capability set of one device. No-op when the
    /// device is unknown; returns whether the device was found.
    pub fn set_device_capabilities(
        &mut self,
        uid: &DeviceUid,
        capabilities: BTreeSet<Capability>,
    ) -> bool {
        match self.devices.get_mut(uid) {
            Some(slot) => {
                *slot = capabilities;
                true
            }
            None => false,
        }
    }

    /// The published detail record the contact currently advertises
    pub fn published_details(&self) -> Option<&VersionedDetails<IdentityDetails>> {
        self.details.published.as_ref()
    }

    /// The detail record the local user accepted
    pub fn trusted_details(&self) -> &VersionedDetails<IdentityDetails> {
        &self.details.trusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::SeededPrng;
    use crate::core_identity::OwnedCryptoIdentity;

    fn contact() -> ContactIdentity {
        let mut prng = SeededPrng::from_os_entropy();
        let crypto =
            OwnedCryptoIdentity::generate("https://server.example.org", &mut prng).public_identity();
        ContactIdentity::new(
            crypto,
            IdentityDetails::new("bob"),
            TrustOrigin::Group {
                group_owner: IdentityId::from_bytes([7u8; 32]),
                timestamp: 100,
            },
            false,
        )
    }

    #[test]
    fn test_trust_level_monotone_under_new_origins() {
        let mut contact = contact();
        assert_eq!(contact.trust_level, TrustLevel::INDIRECT);

        let increased = contact.add_trust_origin(TrustOrigin::Direct { timestamp: 200 });
        assert!(increased);
        assert_eq!(contact.trust_level, TrustLevel::DIRECT);

        // A weaker origin is recorded but does not lower the level
        let increased = contact.add_trust_origin(TrustOrigin::ServerGroupV2 {
            raw_group_identifier: vec![1],
            timestamp: 300,
        });
        assert!(!increased);
        assert_eq!(contact.trust_level, TrustLevel::DIRECT);
        assert_eq!(contact.trust_origins.len(), 3);
    }

    #[test]
    fn test_revocation_and_forceful_trust() {
        let mut contact = contact();
        assert!(contact.is_active());
        contact.is_revoked_as_compromised = true;
        assert!(!contact.is_active());
        contact.is_forcefully_trusted = true;
        assert!(contact.is_active());
    }

    #[test]
    fn test_device_management_is_idempotent() {
        let mut contact = contact();
        let uid = DeviceUid::from_bytes([9u8; 32]);
        assert!(contact.add_device_if_absent(uid));
        assert!(!contact.add_device_if_absent(uid));
        assert!(contact.remove_device_if_present(&uid));
        assert!(!contact.remove_device_if_present(&uid));
    }

    #[test]
    fn test_device_capabilities() {
        let mut contact = contact();
        let uid = DeviceUid::from_bytes([9u8; 32]);
        contact.add_device_if_absent(uid);
        let caps = [Capability::GroupsV2].into_iter().collect();
        assert!(contact.set_device_capabilities(&uid, caps));
        assert!(contact.devices[&uid].contains(&Capability::GroupsV2));

        let unknown = DeviceUid::from_bytes([8u8; 32]);
        assert!(!contact.set_device_capabilities(&unknown, BTreeSet::new()));
    }
}
