//! Keycloak binding scenarios: managed identity creation, signed
//! details, revocation lists and certification expiry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cryptid_core::config::EngineConfig;
use cryptid_core::core_crypto::{KeyType, Keypair, SeededPrng};
use cryptid_core::core_identity::{IdentityDetails, IdentityId, OwnedCryptoIdentity, TrustOrigin};
use cryptid_core::core_keycloak::{
    KeycloakState, RevocationKind, RevocationPayload, SignedRevocation, SignedUserDetails,
    UserDetailsPayload,
};
use cryptid_core::core_store::FlowId;
use cryptid_core::errors::IdentityEngineError;
use cryptid_core::manager::{
    CollectingNotificationSink, EngineDelegates, IdentityManager, MemoryPhotoStore, Notification,
};

const SERVER: &str = "https://server.example.org";
const KC_SERVER: &str = "https://kc.example.org";
const VALIDITY_SECS: u64 = 600;

struct Harness {
    manager: IdentityManager,
    sink: Arc<CollectingNotificationSink>,
    prng: SeededPrng,
    kc_key: Keypair,
}

fn harness() -> Harness {
    let sink = Arc::new(CollectingNotificationSink::new());
    let config = EngineConfig {
        keycloak_signature_validity: Duration::from_secs(VALIDITY_SECS),
        ..Default::default()
    };
    let mut prng = SeededPrng::from_os_entropy();
    let kc_key = Keypair::generate(KeyType::Ed25519, &mut prng);
    Harness {
        manager: IdentityManager::new(
            config,
            EngineDelegates::new(sink.clone(), Arc::new(MemoryPhotoStore::new())),
        ),
        sink,
        prng,
        kc_key,
    }
}

fn keycloak_state(h: &Harness) -> KeycloakState {
    KeycloakState {
        server_url: KC_SERVER.to_string(),
        signature_verification_key: Some(h.kc_key.public_key().to_vec()),
        raw_auth_state: None,
        jwks: None,
    }
}

fn generate_managed(h: &mut Harness) -> IdentityId {
    let state = keycloak_state(h);
    let manager = &h.manager;
    let prng = &mut h.prng;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.generate_owned_identity(
                tx,
                SERVER,
                IdentityDetails::new("alice"),
                None,
                Some((state, "alice@corp".to_string())),
                prng,
            )
        })
        .unwrap()
}

fn add_contact(h: &mut Harness, owned: &IdentityId) -> IdentityId {
    let crypto = OwnedCryptoIdentity::generate(SERVER, &mut h.prng).public_identity();
    let manager = &h.manager;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.add_contact(
                tx,
                owned,
                crypto,
                IdentityDetails::new("bob"),
                TrustOrigin::Keycloak {
                    server_url: KC_SERVER.to_string(),
                    timestamp: 10,
                },
                true,
            )
        })
        .unwrap()
}

fn signed_details(h: &Harness, identity: IdentityId, timestamp: u64) -> SignedUserDetails {
    SignedUserDetails::sign(
        UserDetailsPayload {
            identity,
            name: "bob".to_string(),
            position: Some("engineer".to_string()),
            company: Some("corp".to_string()),
            timestamp,
        },
        &h.kc_key,
    )
    .unwrap()
}

#[test]
fn managed_identity_is_bound_from_creation() {
    let mut h = harness();
    let owned = generate_managed(&mut h);

    let identity = h
        .manager
        .run_in_transaction(FlowId::new(), |tx| h.manager.owned_identity(tx, &owned))
        .unwrap();
    let server = identity.keycloak().unwrap();
    assert_eq!(server.server_url, KC_SERVER);
    assert_eq!(server.user_id, "alice@corp");
}

#[test]
fn signed_details_certify_contacts_and_expire() {
    let mut h = harness();
    let owned = generate_managed(&mut h);
    let bob = add_contact(&mut h, &owned);
    let details = signed_details(&h, bob, 1_000);

    let manager = &h.manager;
    let certified = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.set_contact_keycloak_signed_details(tx, &owned, &bob, details)
        })
        .unwrap();
    assert!(certified);

    // Within the validity window nothing changes
    let uncertified = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.uncertify_expired_contacts(tx, &owned, 1_000 + VALIDITY_SECS)
        })
        .unwrap();
    assert!(uncertified.is_empty());

    // Past the window certification is dropped
    let uncertified = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.uncertify_expired_contacts(tx, &owned, 1_001 + VALIDITY_SECS)
        })
        .unwrap();
    assert_eq!(uncertified, [bob].into_iter().collect());
}

#[test]
fn details_signed_by_another_server_do_not_certify() {
    let mut h = harness();
    let owned = generate_managed(&mut h);
    let bob = add_contact(&mut h, &owned);

    let rogue = Keypair::generate(KeyType::Ed25519, &mut h.prng);
    let forged = SignedUserDetails::sign(
        UserDetailsPayload {
            identity: bob,
            name: "bob".to_string(),
            position: None,
            company: None,
            timestamp: 1_000,
        },
        &rogue,
    )
    .unwrap();

    let manager = &h.manager;
    let certified = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.set_contact_keycloak_signed_details(tx, &owned, &bob, forged)
        })
        .unwrap();
    assert!(!certified);
}

#[test]
fn revocation_list_compromises_contact_and_notifies() {
    let mut h = harness();
    let owned = generate_managed(&mut h);
    let bob = add_contact(&mut h, &owned);
    h.sink.drain();

    let revocation = SignedRevocation::sign(
        RevocationPayload {
            identity: bob,
            kind: RevocationKind::Compromised,
            timestamp: 2_000,
        },
        &h.kc_key,
    )
    .unwrap()
    .to_json()
    .unwrap();

    let manager = &h.manager;
    let compromised = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.verify_and_add_keycloak_revocations(tx, &owned, &[revocation], 2_100)
        })
        .unwrap();
    assert_eq!(compromised, [bob].into_iter().collect());

    let contact = manager
        .run_in_transaction(FlowId::new(), |tx| manager.contact(tx, &owned, &bob))
        .unwrap();
    assert!(contact.is_revoked_as_compromised);
    assert!(!contact.is_active());

    assert!(h.sink.drain().contains(&Notification::ContactRevokedAsCompromised {
        owned,
        contact: bob,
    }));

    // Forceful trust keeps the contact usable despite the revocation
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.set_contact_forcefully_trusted(tx, &owned, &bob, true)
        })
        .unwrap();
    let contact = manager
        .run_in_transaction(FlowId::new(), |tx| manager.contact(tx, &owned, &bob))
        .unwrap();
    assert!(contact.is_active());
}

#[test]
fn revocation_list_requires_managed_identity() {
    let mut h = harness();
    let manager = &h.manager;
    let prng = &mut h.prng;
    let owned = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.generate_owned_identity(
                tx,
                SERVER,
                IdentityDetails::new("solo"),
                None,
                None,
                prng,
            )
        })
        .unwrap();

    let result = manager.run_in_transaction(FlowId::new(), |tx| {
        manager.verify_and_add_keycloak_revocations(tx, &owned, &[], 100)
    });
    assert!(matches!(
        result,
        Err(IdentityEngineError::OwnedIdentityIsNotKeycloakManaged)
    ));
}

#[test]
fn push_topics_and_self_revocation_nonce_survive_rebind() {
    let mut h = harness();
    let owned = generate_managed(&mut h);
    let state = keycloak_state(&h);

    let manager = &h.manager;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            let topics: BTreeSet<_> = ["topic-a".to_string()].into();
            assert!(manager.update_keycloak_push_topics(tx, &owned, topics.clone())?);
            assert!(!manager.update_keycloak_push_topics(tx, &owned, topics)?);

            manager.set_keycloak_self_revocation_test_nonce(
                tx,
                &owned,
                Some("probe-1".to_string()),
            )?;
            // Re-binding to the same server keeps the nonce
            manager.bind_owned_identity_to_keycloak(tx, &owned, state, "alice@corp")?;
            assert_eq!(
                manager.keycloak_self_revocation_test_nonce(tx, &owned)?,
                Some("probe-1".to_string())
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn unbind_drops_binding_and_certifications() {
    let mut h = harness();
    let owned = generate_managed(&mut h);
    let bob = add_contact(&mut h, &owned);
    let details = signed_details(&h, bob, 1_000);

    let manager = &h.manager;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.set_contact_keycloak_signed_details(tx, &owned, &bob, details)?;
            manager.unbind_owned_identity_from_keycloak(tx, &owned)?;
            let identity = manager.owned_identity(tx, &owned)?;
            assert!(!identity.is_keycloak_managed());
            assert!(!identity.contacts[&bob].is_certified_by_own_keycloak);
            Ok(())
        })
        .unwrap();
}
