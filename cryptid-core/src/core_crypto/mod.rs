//! Cryptographic primitives for the identity core
//!
//! Everything key-shaped lives here: signing/agreement keypairs, the
//! MAC used for deterministic tag and seed derivation, and the seeded
//! PRNG every key/nonce generation goes through. Higher layers never
//! touch `*_dalek` types directly.

use thiserror::Error;

mod keypair;
mod mac;
mod seed;

pub use keypair::{KeyType, Keypair};
pub use mac::{MacKey, MAC_KEY_LENGTH, MAC_TAG_LENGTH};
pub use seed::{derive_deterministic_seed, Prng, Seed, SeededPrng, SEED_LENGTH};

/// Errors from cryptographic operations
#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    /// Key material had the wrong length for its algorithm
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Seed material had the wrong length
    #[error("Invalid seed length: expected {expected}, got {actual}")]
    InvalidSeedLength { expected: usize, actual: usize },

    /// Signature could not be verified
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// MAC tag could not be verified
    #[error("MAC verification failed")]
    MacVerificationFailed,

    /// Attempted a signing operation with a non-signing key
    #[error("Key of type {0} cannot sign")]
    NotASigningKey(String),

    /// Authenticated encryption failed
    #[error("Seal failed: {0}")]
    SealFailed(String),

    /// Authenticated decryption failed (wrong key or tampered data)
    #[error("Open failed: {0}")]
    OpenFailed(String),
}
