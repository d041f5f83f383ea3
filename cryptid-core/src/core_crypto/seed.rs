//! Seeds and PRNGs
//!
//! Every piece of randomness the engine consumes flows through the
//! [`Prng`] trait, so protocols that need reproducible key material
//! can inject a seeded generator.

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

use super::{CryptoError, MacKey};

/// Length of a seed in bytes
pub const SEED_LENGTH: usize = 32;

/// Fixed input byte MACed during deterministic seed derivation
const SEED_DIVERSIFICATION_PREFIX: [u8; 1] = [0x55];

/// A 32-byte seed, suitable for keying a [`SeededPrng`]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed([u8; SEED_LENGTH]);

impl Seed {
    /// Construct a seed from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SEED_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidSeedLength {
                expected: SEED_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Seed(bytes))
    }

    /// Generate a fresh random seed
    pub fn generate(prng: &mut dyn Prng) -> Self {
        let mut bytes = [0u8; SEED_LENGTH];
        prng.fill_bytes(&mut bytes);
        Seed(bytes)
    }

    /// Raw seed bytes
    pub fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Seed").field(&"<redacted>").finish()
    }
}

impl Drop for Seed {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Source of cryptographic randomness
pub trait Prng: Send {
    /// Fill `dest` with random bytes
    fn fill_bytes(&mut self, dest: &mut [u8]);

    /// Convenience: produce `n` random bytes
    fn bytes(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.fill_bytes(&mut out);
        out
    }
}

/// PRNG backed by `StdRng`, either seeded or fed from OS entropy
pub struct SeededPrng(StdRng);

impl SeededPrng {
    /// Deterministic PRNG keyed by a seed
    pub fn from_seed(seed: &Seed) -> Self {
        SeededPrng(StdRng::from_seed(*seed.as_bytes()))
    }

    /// PRNG keyed by fresh OS entropy
    pub fn from_os_entropy() -> Self {
        let mut seed = [0u8; SEED_LENGTH];
        OsRng.fill_bytes(&mut seed);
        let prng = SeededPrng(StdRng::from_seed(seed));
        seed.zeroize();
        prng
    }
}

impl Prng for SeededPrng {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }
}

/// Derive a per-purpose deterministic seed from an owned identity's
/// secret MAC key and caller-chosen diversification data.
///
/// Computed as `SHA256( HMAC(mac_key, 0x55) ‖ diversification )`. The
/// same diversification data always yields the same seed; empty data
/// is rejected upstream (the façade surfaces the typed error).
pub fn derive_deterministic_seed(
    mac_key: &MacKey,
    diversification: &[u8],
) -> Result<Seed, CryptoError> {
    let tag = mac_key.compute_tag(&SEED_DIVERSIFICATION_PREFIX)?;
    let mut hasher = Sha256::new();
    hasher.update(tag);
    hasher.update(diversification);
    let digest = hasher.finalize();
    Seed::from_bytes(&digest)
}
