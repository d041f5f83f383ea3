//! Crypto identity types
//!
//! A `CryptoIdentity` is the public face of an identity: the server it
//! lives on plus its signing and agreement public keys. The owned
//! variant additionally holds the private halves and the secret MAC
//! key used for deterministic tag and seed derivation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_crypto::{CryptoError, KeyType, Keypair, MacKey, Prng};

/// Stable identifier of a crypto identity
///
/// Computed as the BLAKE3 hash of the identity's canonical encoding,
/// so it is the same on every device that knows the identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityId([u8; 32]);

// Hex string in human-readable formats so the id works as a JSON map
// key (e.g. `OwnedIdentity::contacts` in backup snapshots); raw bytes
// in binary formats to keep the bincode wire encoding unchanged.
impl Serialize for IdentityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for IdentityId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("IdentityId must be 32 bytes"))?;
            Ok(IdentityId(arr))
        } else {
            Ok(IdentityId(<[u8; 32]>::deserialize(deserializer)?))
        }
    }
}

impl IdentityId {
    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Reconstruct an identifier from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        IdentityId(bytes)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self)
    }
}

/// Public crypto identity: server URL plus public key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoIdentity {
    /// URL of the distribution server this identity is registered on
    pub server_url: String,
    /// Ed25519 verifying key (32 bytes)
    pub signing_public_key: Vec<u8>,
    /// X25519 public key (32 bytes)
    pub agreement_public_key: Vec<u8>,
}

impl CryptoIdentity {
    /// Stable identifier derived from the canonical encoding
    pub fn id(&self) -> IdentityId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.server_url.as_bytes());
        hasher.update(&[0x00]);
        hasher.update(&self.signing_public_key);
        hasher.update(&self.agreement_public_key);
        IdentityId(*hasher.finalize().as_bytes())
    }

    /// Verify an Ed25519 signature made by this identity
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        Keypair::verify(&self.signing_public_key, msg, sig)
    }
}

/// Fully-controlled crypto identity: private keys present
///
/// Exactly one of these exists per locally-controlled identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedCryptoIdentity {
    /// URL of the distribution server
    pub server_url: String,
    /// Ed25519 signing keypair
    signing: Keypair,
    /// X25519 agreement keypair
    agreement: Keypair,
    /// Secret MAC key for deterministic tag/seed derivation
    mac_key: MacKey,
}

impl OwnedCryptoIdentity {
    /// Generate fresh key material for a new owned identity
    pub fn generate(server_url: &str, prng: &mut dyn Prng) -> Self {
        OwnedCryptoIdentity {
            server_url: server_url.to_string(),
            signing: Keypair::generate(KeyType::Ed25519, prng),
            agreement: Keypair::generate(KeyType::X25519, prng),
            mac_key: MacKey::generate(prng),
        }
    }

    /// The public identity corresponding to this key material
    pub fn public_identity(&self) -> CryptoIdentity {
        CryptoIdentity {
            server_url: self.server_url.clone(),
            signing_public_key: self.signing.public_key().to_vec(),
            agreement_public_key: self.agreement.public_key().to_vec(),
        }
    }

    /// Stable identifier of the public identity
    pub fn id(&self) -> IdentityId {
        self.public_identity().id()
    }

    /// Sign on behalf of this identity
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.signing.sign(msg)
    }

    /// Secret MAC key
    pub fn mac_key(&self) -> &MacKey {
        &self.mac_key
    }

    /// Signing keypair, for operations that authenticate as the owner
    pub fn signing_keypair(&self) -> &Keypair {
        &self.signing
    }
}
