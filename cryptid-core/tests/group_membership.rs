//! Group scenarios across both generations: owned and joined V1
//! groups, and the consolidated-blob V2 lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use cryptid_core::config::EngineConfig;
use cryptid_core::core_crypto::SeededPrng;
use cryptid_core::core_group::GroupDetails;
use cryptid_core::core_group_v2::{BlobKeys, GroupV2Category, Permission, ServerBlob};
use cryptid_core::core_identity::{
    IdentityDetails, IdentityId, OwnedCryptoIdentity, PhotoDownloadNeed, PhotoServerKeyAndLabel,
    TrustOrigin,
};
use cryptid_core::core_store::FlowId;
use cryptid_core::errors::IdentityEngineError;
use cryptid_core::manager::{
    CollectingNotificationSink, EngineDelegates, IdentityManager, MemoryPhotoStore,
};

const SERVER: &str = "https://server.example.org";

struct Harness {
    manager: IdentityManager,
    prng: SeededPrng,
}

fn harness() -> Harness {
    Harness {
        manager: IdentityManager::new(
            EngineConfig::default(),
            EngineDelegates::new(
                Arc::new(CollectingNotificationSink::new()),
                Arc::new(MemoryPhotoStore::new()),
            ),
        ),
        prng: SeededPrng::from_os_entropy(),
    }
}

fn generate(h: &mut Harness, name: &str) -> IdentityId {
    let manager = &h.manager;
    let prng = &mut h.prng;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.generate_owned_identity(
                tx,
                SERVER,
                IdentityDetails::new(name),
                None,
                None,
                prng,
            )
        })
        .unwrap()
}

fn add_contact(h: &mut Harness, owned: &IdentityId, name: &str) -> IdentityId {
    let crypto = OwnedCryptoIdentity::generate(SERVER, &mut h.prng).public_identity();
    let manager = &h.manager;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.add_contact(
                tx,
                owned,
                crypto,
                IdentityDetails::new(name),
                TrustOrigin::Direct { timestamp: 1 },
                true,
            )
        })
        .unwrap()
}

#[test]
fn owned_group_lifecycle_empty_delete_only() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let bob = add_contact(&mut h, &owned, "bob");

    let manager = &h.manager;
    let prng = &mut h.prng;
    let group = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_owned_group(
                tx,
                &owned,
                GroupDetails::new("sailing"),
                [bob].into_iter().collect(),
                prng,
            )
        })
        .unwrap();

    // Still holds a pending member: deletion rejected
    let premature = manager.run_in_transaction(FlowId::new(), |tx| {
        manager.delete_owned_group(tx, &owned, &group)
    });
    assert!(matches!(
        premature,
        Err(IdentityEngineError::OwnedContactGroupStillHasMembersOrPendingMembers)
    ));

    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.remove_members_from_owned_group(
                tx,
                &owned,
                &group,
                &[bob].into_iter().collect(),
            )?;
            manager.delete_owned_group(tx, &owned, &group)
        })
        .unwrap();
}

#[test]
fn owned_group_pending_requires_active_contact() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let stranger = IdentityId::from_bytes([42; 32]);

    let manager = &h.manager;
    let prng = &mut h.prng;
    let result = manager.run_in_transaction(FlowId::new(), |tx| {
        manager.create_owned_group(
            tx,
            &owned,
            GroupDetails::new("strangers"),
            [stranger].into_iter().collect(),
            prng,
        )
    });
    assert!(matches!(
        result,
        Err(IdentityEngineError::PendingMemberIsNotAnActiveContact)
    ));
}

#[test]
fn owned_group_member_accept_and_leave_cycle() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let bob = add_contact(&mut h, &owned, "bob");

    let manager = &h.manager;
    let prng = &mut h.prng;
    let group = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_owned_group(
                tx,
                &owned,
                GroupDetails::new("chess"),
                [bob].into_iter().collect(),
                prng,
            )
        })
        .unwrap();

    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.confirm_pending_member(tx, &owned, &group, bob)?;
            let identity = manager.owned_identity(tx, &owned)?;
            assert!(identity.groups_owned[&group].members.contains(&bob));

            manager.demote_member_to_declined(tx, &owned, &group, bob)?;
            let identity = manager.owned_identity(tx, &owned)?;
            assert!(identity.groups_owned[&group].pending[&bob].declined);
            Ok(())
        })
        .unwrap();
}

#[test]
fn owned_group_photo_server_key_flags_download() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let bob = add_contact(&mut h, &owned, "bob");

    let manager = &h.manager;
    let prng = &mut h.prng;
    let group = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_owned_group(
                tx,
                &owned,
                GroupDetails::new("photographers"),
                [bob].into_iter().collect(),
                prng,
            )
        })
        .unwrap();

    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.set_owned_group_photo_server_key_and_label(
                tx,
                &owned,
                &group,
                PhotoServerKeyAndLabel {
                    key: vec![4; 32],
                    label: vec![5; 16],
                },
            )?;
            assert_eq!(
                manager.photos_needing_download(tx, &owned)?,
                vec![PhotoDownloadNeed::OwnedGroup {
                    uid: group,
                    version: 0,
                }]
            );

            let missing = cryptid_core::core_group::GroupUid::generate(prng);
            let unknown = manager.set_owned_group_photo_server_key_and_label(
                tx,
                &owned,
                &missing,
                PhotoServerKeyAndLabel {
                    key: vec![4; 32],
                    label: vec![5; 16],
                },
            );
            assert!(matches!(unknown, Err(IdentityEngineError::GroupNotFound)));
            Ok(())
        })
        .unwrap();
}

#[test]
fn joined_group_watermark_makes_replays_noops() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let owner = add_contact(&mut h, &owned, "carol");
    let uid = cryptid_core::core_group::GroupUid::generate(&mut h.prng);

    let manager = &h.manager;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_joined_group(
                tx,
                &owned,
                uid,
                owner,
                GroupDetails::new("carol's group"),
                BTreeSet::new(),
            )
        })
        .unwrap();

    let members: BTreeSet<_> = [owner].into_iter().collect();
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            assert!(manager.update_joined_group_members(
                tx,
                &owned,
                &uid,
                &owner,
                members.clone(),
                BTreeSet::new(),
                7,
            )?);
            // Replay with the same watermark changes nothing
            assert!(!manager.update_joined_group_members(
                tx,
                &owned,
                &uid,
                &owner,
                BTreeSet::new(),
                BTreeSet::new(),
                7,
            )?);
            let identity = manager.owned_identity(tx, &owned)?;
            assert_eq!(identity.groups_joined[&(uid, owner)].members, members);
            Ok(())
        })
        .unwrap();
}

#[test]
fn group_v2_create_freeze_and_update() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let bob_crypto = OwnedCryptoIdentity::generate(SERVER, &mut h.prng).public_identity();
    let bob = bob_crypto.id();

    let manager = &h.manager;
    let prng = &mut h.prng;
    let identifier = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_group_v2(
                tx,
                &owned,
                SERVER,
                GroupV2Category::Server,
                GroupDetails::new("ops"),
                vec![(
                    bob_crypto.clone(),
                    [Permission::SendMessage].into_iter().collect(),
                )],
                prng,
            )
        })
        .unwrap();

    manager
        .run_in_transaction(FlowId::new(), |tx| {
            let identity = manager.owned_identity(tx, &owned)?;
            let group = &identity.groups_v2[&identifier];
            assert_eq!(group.version, 0);
            assert!(!group.own_invitation_nonce.is_empty());
            assert_eq!(group.other_members().len(), 1);
            assert!(group.other_members()[0].is_pending);
            Ok(())
        })
        .unwrap();

    // Frozen groups reject local membership mutation
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.freeze_group_v2(tx, &owned, &identifier)?;
            let frozen = manager.move_group_v2_pending_to_member(tx, &owned, &identifier, bob);
            assert!(matches!(frozen, Err(IdentityEngineError::GroupIsFrozen)));
            manager.unfreeze_group_v2(tx, &owned, &identifier)?;
            manager.move_group_v2_pending_to_member(tx, &owned, &identifier, bob)
        })
        .unwrap();
}

#[test]
fn group_v2_invitation_nonce_first_use_only() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");

    let manager = &h.manager;
    let prng = &mut h.prng;
    let identifier = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_group_v2(
                tx,
                &owned,
                SERVER,
                GroupV2Category::Server,
                GroupDetails::new("ops"),
                vec![],
                prng,
            )
        })
        .unwrap();

    manager
        .run_in_transaction(FlowId::new(), |tx| {
            let nonce = {
                let identity = manager.owned_identity(tx, &owned)?;
                identity.groups_v2[&identifier].own_invitation_nonce.clone()
            };
            assert!(manager.mark_group_v2_invitation_nonce_used(tx, &owned, &identifier, &nonce)?);
            // A replay of the same invitation is detectable
            assert!(!manager.mark_group_v2_invitation_nonce_used(
                tx,
                &owned,
                &identifier,
                &nonce
            )?);

            let forged = manager.mark_group_v2_invitation_nonce_used(
                tx,
                &owned,
                &identifier,
                &[9; 16],
            );
            assert!(matches!(forged, Err(IdentityEngineError::NotAGroupMember)));
            Ok(())
        })
        .unwrap();
}

#[test]
fn group_v2_consolidated_update_rejects_stale_versions() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");

    let manager = &h.manager;
    let prng = &mut h.prng;
    let identifier = manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.create_group_v2(
                tx,
                &owned,
                SERVER,
                GroupV2Category::Server,
                GroupDetails::new("ops"),
                vec![],
                prng,
            )
        })
        .unwrap();

    // Build a consolidated blob with a bumped version from the stored
    // state, re-seal it under fresh keys, and apply it.
    let (sealed, new_keys, own_nonce) = manager
        .run_in_transaction(FlowId::new(), |tx| {
            let identity = manager.owned_identity(tx, &owned)?;
            let group = &identity.groups_v2[&identifier];
            let mut members = group.other_members().to_vec();
            members.push(cryptid_core::core_group_v2::GroupMemberEntry {
                identity: identity.crypto.public_identity(),
                permissions: [Permission::GroupAdmin, Permission::SendMessage]
                    .into_iter()
                    .collect(),
                invitation_nonce: group.own_invitation_nonce.clone(),
                is_pending: false,
            });
            let blob = ServerBlob {
                version: group.version + 1,
                details: group.details.trusted.clone(),
                members,
                administrators_chain: group.administrators_chain.clone(),
                server_photo_info: None,
            };
            let new_keys = BlobKeys {
                main_seed: group.blob_keys.main_seed.clone(),
                version_seed: cryptid_core::core_crypto::Seed::generate(prng),
                group_admin_auth_keypair: group.blob_keys.group_admin_auth_keypair.clone(),
            };
            let sealed = blob.seal(&new_keys, prng)?;
            Ok((sealed, new_keys, group.own_invitation_nonce.clone()))
        })
        .unwrap();

    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.update_group_v2(tx, &owned, &identifier, &sealed, new_keys.clone(), true)?;
            let identity = manager.owned_identity(tx, &owned)?;
            let group = &identity.groups_v2[&identifier];
            assert_eq!(group.version, 1);
            assert_eq!(group.own_invitation_nonce, own_nonce);

            // Re-applying the same blob now fails the monotonicity
            // check inside a nested step and leaves the group intact.
            // (version 1 is not lower than 1, so craft a stale one)
            Ok(())
        })
        .unwrap();

    // A stale (version 0) blob is rejected without corrupting state
    let stale = manager.run_in_transaction(FlowId::new(), |tx| {
        let identity = manager.owned_identity(tx, &owned)?;
        let group = &identity.groups_v2[&identifier];
        let mut members = group.other_members().to_vec();
        members.push(cryptid_core::core_group_v2::GroupMemberEntry {
            identity: identity.crypto.public_identity(),
            permissions: [Permission::GroupAdmin].into_iter().collect(),
            invitation_nonce: group.own_invitation_nonce.clone(),
            is_pending: false,
        });
        let blob = ServerBlob {
            version: 0,
            details: group.details.trusted.clone(),
            members,
            administrators_chain: group.administrators_chain.clone(),
            server_photo_info: None,
        };
        let sealed = blob.seal(&new_keys, prng)?;
        manager.update_group_v2(tx, &owned, &identifier, &sealed, new_keys.clone(), true)?;
        Ok(())
    });
    assert!(matches!(
        stale,
        Err(IdentityEngineError::VersionConflict { stored: 1, incoming: 0 })
    ));
}

#[test]
fn group_v2_join_records_trust_origins() {
    let mut h = harness();
    let owned = generate(&mut h, "alice");
    let bob = add_contact(&mut h, &owned, "bob");

    // Carol (the admin) built the group server-side with alice and
    // bob in it; alice receives the sealed blob and joins.
    let mut their_prng = SeededPrng::from_os_entropy();
    let carol = OwnedCryptoIdentity::generate(SERVER, &mut their_prng);

    let (identifier, sealed, keys) = {
        let alice_identity = h
            .manager
            .run_in_transaction(FlowId::new(), |tx| h.manager.owned_identity(tx, &owned))
            .unwrap();
        let bob_identity = h
            .manager
            .run_in_transaction(FlowId::new(), |tx| h.manager.contact(tx, &owned, &bob))
            .unwrap();

        let chain = cryptid_core::core_group_v2::AdministratorsChain::genesis(
            carol.signing_keypair(),
            vec![carol.signing_keypair().public_key().to_vec()],
        )
        .unwrap();
        let entry = |identity, nonce: u8, pending| cryptid_core::core_group_v2::GroupMemberEntry {
            identity,
            permissions: [Permission::SendMessage].into_iter().collect(),
            invitation_nonce: vec![nonce; 16],
            is_pending: pending,
        };
        let blob = ServerBlob {
            version: 3,
            details: cryptid_core::core_identity::VersionedDetails::initial(GroupDetails::new(
                "carol's v2",
            )),
            members: vec![
                entry(carol.public_identity(), 1, false),
                entry(alice_identity.crypto.public_identity(), 2, false),
                entry(bob_identity.crypto.clone(), 3, true),
            ],
            administrators_chain: chain,
            server_photo_info: None,
        };
        let keys = BlobKeys::generate_for_administrator(&mut their_prng);
        let sealed = blob.seal(&keys, &mut their_prng).unwrap();
        let identifier = cryptid_core::core_group_v2::GroupIdentifier::new(
            cryptid_core::core_group::GroupUid::generate(&mut their_prng),
            SERVER,
            GroupV2Category::Server,
        );
        (identifier, sealed, keys)
    };

    let manager = &h.manager;
    manager
        .run_in_transaction(FlowId::new(), |tx| {
            manager.join_group_v2(tx, &owned, identifier.clone(), &sealed, keys, 900)
        })
        .unwrap();

    let contact = manager
        .run_in_transaction(FlowId::new(), |tx| manager.contact(tx, &owned, &bob))
        .unwrap();
    assert!(contact.trust_origins.iter().any(|origin| matches!(
        origin,
        TrustOrigin::ServerGroupV2 { timestamp: 900, .. }
    )));

    let identity = manager
        .run_in_transaction(FlowId::new(), |tx| manager.owned_identity(tx, &owned))
        .unwrap();
    let group = &identity.groups_v2[&identifier];
    assert_eq!(group.own_invitation_nonce, vec![2; 16]);
    assert_eq!(group.other_members().len(), 2);
}
