//! Group V2 server blob and blob keys
//!
//! The consolidated group state is shipped as one encrypted blob:
//! core details, members with permissions and invitation nonces, the
//! administrators chain and optional photo info. Blob keys carry the
//! material needed to decrypt/authenticate it, plus the group-admin
//! authentication keypair when the local identity is an
//! administrator.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::core_crypto::{CryptoError, Keypair, Prng, Seed};
use crate::core_group::GroupDetails;
use crate::core_identity::{
    CryptoIdentity, IdentityId, PhotoServerKeyAndLabel, VersionedDetails,
};
use crate::errors::{EngineResult, IdentityEngineError};

use super::{AdministratorsChain, Permission};

/// Nonce size of ChaCha20-Poly1305
const BLOB_NONCE_LENGTH: usize = 12;

/// Length of a member invitation nonce
pub const INVITATION_NONCE_LENGTH: usize = 16;

/// Cryptographic material protecting a group's server blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobKeys {
    /// Long-lived seed shared by all group members
    pub main_seed: Seed,
    /// Seed rotated on each blob version
    pub version_seed: Seed,
    /// Present only for administrators: authenticates blob uploads
    pub group_admin_auth_keypair: Option<Keypair>,
}

impl BlobKeys {
    /// Generate keys for a brand new group (administrator side)
    pub fn generate_for_administrator(prng: &mut dyn Prng) -> Self {
        BlobKeys {
            main_seed: Seed::generate(prng),
            version_seed: Seed::generate(prng),
            group_admin_auth_keypair: Some(Keypair::generate(
                crate::core_crypto::KeyType::Ed25519,
                prng,
            )),
        }
    }

    /// The symmetric key protecting the blob for these seeds
    fn encryption_key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.main_seed.as_bytes());
        hasher.update(self.version_seed.as_bytes());
        hasher.finalize().into()
    }
}

/// Photo stored on the server for the whole group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPhotoInfo {
    /// The member that uploaded the photo
    pub uploader: IdentityId,
    /// Where/how the photo is stored server-side
    pub key_and_label: PhotoServerKeyAndLabel,
}

/// One member (or pending member) inside the server blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMemberEntry {
    pub identity: CryptoIdentity,
    pub permissions: BTreeSet<Permission>,
    /// Unique per-member nonce proving the invitation
    pub invitation_nonce: Vec<u8>,
    /// True until the member accepts the invitation
    pub is_pending: bool,
}

impl GroupMemberEntry {
    pub fn id(&self) -> IdentityId {
        self.identity.id()
    }
}

/// Consolidated group state as hosted on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerBlob {
    /// Group version this blob consolidates
    pub version: u64,
    /// Core group details
    pub details: VersionedDetails<GroupDetails>,
    /// All members and pending members with their permissions
    pub members: Vec<GroupMemberEntry>,
    /// Authority lineage
    pub administrators_chain: AdministratorsChain,
    /// Optional server-side photo reference
    pub server_photo_info: Option<ServerPhotoInfo>,
}

impl ServerBlob {
    /// Structural validation: chain integrity, nonce uniqueness, no
    /// identity present twice.
    pub fn validate(&self) -> EngineResult<()> {
        self.administrators_chain.validate()?;

        let mut nonces = BTreeSet::new();
        let mut identities = BTreeSet::new();
        for member in &self.members {
            if !nonces.insert(member.invitation_nonce.clone()) {
                return Err(IdentityEngineError::DuplicateInvitationNonce);
            }
            if !identities.insert(member.id()) {
                return Err(IdentityEngineError::MemberAndPendingMemberOverlap);
            }
        }
        Ok(())
    }

    /// Encrypt the blob under the given keys
    pub fn seal(&self, keys: &BlobKeys, prng: &mut dyn Prng) -> EngineResult<Vec<u8>> {
        let plaintext = bincode::serialize(self)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.encryption_key()));
        let mut nonce_bytes = [0u8; BLOB_NONCE_LENGTH];
        prng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(BLOB_NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt and validate a blob fetched from the server
    pub fn open(bytes: &[u8], keys: &BlobKeys) -> EngineResult<ServerBlob> {
        if bytes.len() < BLOB_NONCE_LENGTH {
            return Err(CryptoError::OpenFailed("blob too short".to_string()).into());
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(BLOB_NONCE_LENGTH);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.encryption_key()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::OpenFailed("decryption failed".to_string()))?;
        let blob: ServerBlob = bincode::deserialize(&plaintext)?;
        blob.validate()?;
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::{KeyType, SeededPrng};
    use crate::core_identity::OwnedCryptoIdentity;

    fn member(prng: &mut SeededPrng, nonce: u8, pending: bool) -> GroupMemberEntry {
        GroupMemberEntry {
            identity: OwnedCryptoIdentity::generate("https://s.example.org", prng)
                .public_identity(),
            permissions: [Permission::SendMessage].into_iter().collect(),
            invitation_nonce: vec![nonce; INVITATION_NONCE_LENGTH],
            is_pending: pending,
        }
    }

    fn blob(prng: &mut SeededPrng) -> ServerBlob {
        let admin = Keypair::generate(KeyType::Ed25519, prng);
        ServerBlob {
            version: 1,
            details: VersionedDetails::initial(GroupDetails::new("ops")),
            members: vec![member(prng, 1, false), member(prng, 2, true)],
            administrators_chain: AdministratorsChain::genesis(
                &admin,
                vec![admin.public_key().to_vec()],
            )
            .unwrap(),
            server_photo_info: None,
        }
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let mut prng = SeededPrng::from_os_entropy();
        let keys = BlobKeys::generate_for_administrator(&mut prng);
        let blob = blob(&mut prng);

        let sealed = blob.seal(&keys, &mut prng).unwrap();
        let opened = ServerBlob::open(&sealed, &keys).unwrap();
        assert_eq!(opened, blob);
    }

    #[test]
    fn test_open_with_wrong_keys_fails() {
        let mut prng = SeededPrng::from_os_entropy();
        let keys = BlobKeys::generate_for_administrator(&mut prng);
        let other_keys = BlobKeys::generate_for_administrator(&mut prng);
        let sealed = blob(&mut prng).seal(&keys, &mut prng).unwrap();
        assert!(ServerBlob::open(&sealed, &other_keys).is_err());
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let mut prng = SeededPrng::from_os_entropy();
        let mut blob = blob(&mut prng);
        blob.members[1].invitation_nonce = blob.members[0].invitation_nonce.clone();
        assert!(matches!(
            blob.validate(),
            Err(IdentityEngineError::DuplicateInvitationNonce)
        ));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut prng = SeededPrng::from_os_entropy();
        let mut blob = blob(&mut prng);
        blob.members[1].identity = blob.members[0].identity.clone();
        assert!(matches!(
            blob.validate(),
            Err(IdentityEngineError::MemberAndPendingMemberOverlap)
        ));
    }
}
