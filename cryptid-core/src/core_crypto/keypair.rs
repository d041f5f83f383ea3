//! Keypair module
//!
//! Handles cryptographic key material for owned and contact identities.
//! Uses Ed25519 for signatures and X25519 for key agreement.
//!
//! Security: secret keys are zeroized on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::{CryptoError, Prng};

/// Key type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Ed25519 for signatures
    Ed25519,
    /// X25519 for Diffie-Hellman key agreement
    X25519,
}

impl KeyType {
    fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "Ed25519",
            KeyType::X25519 => "X25519",
        }
    }
}

/// Keypair holding public and secret key bytes
///
/// All key generation is driven by a caller-supplied [`Prng`] so that
/// key material can be derived deterministically from engine seeds.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Keypair {
    /// Type of key
    pub key_type: KeyType,
    /// Public key bytes (32 bytes)
    public: Vec<u8>,
    /// Secret key bytes (32 bytes), zeroized on drop
    secret: Vec<u8>,
}

impl Keypair {
    /// Generate a new keypair of the specified type
    pub fn generate(key_type: KeyType, prng: &mut dyn Prng) -> Self {
        let mut seed = [0u8; 32];
        prng.fill_bytes(&mut seed);

        let keypair = match key_type {
            KeyType::Ed25519 => {
                let signing_key = SigningKey::from_bytes(&seed);
                let verifying_key = signing_key.verifying_key();
                Keypair {
                    key_type,
                    public: verifying_key.to_bytes().to_vec(),
                    secret: signing_key.to_bytes().to_vec(),
                }
            }
            KeyType::X25519 => {
                let secret = StaticSecret::from(seed);
                let public = X25519PublicKey::from(&secret);
                Keypair {
                    key_type,
                    public: public.to_bytes().to_vec(),
                    secret: secret.to_bytes().to_vec(),
                }
            }
        };
        seed.zeroize();
        keypair
    }

    /// Sign a message (Ed25519 only), returning a 64-byte signature
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.key_type != KeyType::Ed25519 {
            return Err(CryptoError::NotASigningKey(self.key_type.as_str().to_string()));
        }
        let secret: [u8; 32] =
            self.secret
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: 32,
                    actual: self.secret.len(),
                })?;
        let signing_key = SigningKey::from_bytes(&secret);
        Ok(signing_key.sign(msg).to_bytes().to_vec())
    }

    /// Verify an Ed25519 signature made over `msg` by `pubkey`
    pub fn verify(pubkey: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        let pubkey: [u8; 32] = match pubkey.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let verifying_key = match VerifyingKey::from_bytes(&pubkey) {
            Ok(vk) => vk,
            Err(_) => return false,
        };
        let signature = match Signature::from_slice(sig) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        verifying_key.verify(msg, &signature).is_ok()
    }

    /// Get a reference to the public key bytes
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Get a reference to the secret key bytes (use carefully!)
    pub(crate) fn secret_key(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("key_type", &self.key_type)
            .field("public", &hex::encode(&self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}
