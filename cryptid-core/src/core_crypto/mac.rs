//! MAC key module
//!
//! HMAC-SHA256 secret carried by every owned crypto identity. The tag
//! it produces authenticates data on behalf of the owned identity and
//! anchors deterministic seed derivation.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroize;

use super::{CryptoError, Prng};

type HmacSha256 = Hmac<Sha256>;

/// Length of a MAC key in bytes
pub const MAC_KEY_LENGTH: usize = 32;

/// Length of a MAC tag in bytes
pub const MAC_TAG_LENGTH: usize = 32;

/// Secret MAC key (HMAC-SHA256), zeroized on drop
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MacKey([u8; MAC_KEY_LENGTH]);

impl MacKey {
    /// Generate a fresh MAC key
    pub fn generate(prng: &mut dyn Prng) -> Self {
        let mut bytes = [0u8; MAC_KEY_LENGTH];
        prng.fill_bytes(&mut bytes);
        MacKey(bytes)
    }

    /// Reconstruct a MAC key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; MAC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: MAC_KEY_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(MacKey(bytes))
    }

    /// Compute the HMAC-SHA256 tag over `data`
    pub fn compute_tag(&self, data: &[u8]) -> Result<[u8; MAC_TAG_LENGTH], CryptoError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.0).map_err(|_| CryptoError::InvalidKeyLength {
                expected: MAC_KEY_LENGTH,
                actual: self.0.len(),
            })?;
        mac.update(data);
        let tag = mac.finalize().into_bytes();
        Ok(tag.into())
    }

    /// Verify a tag over `data` in constant time
    pub fn verify_tag(&self, data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.0).map_err(|_| CryptoError::InvalidKeyLength {
                expected: MAC_KEY_LENGTH,
                actual: self.0.len(),
            })?;
        mac.update(data);
        mac.verify_slice(tag)
            .map_err(|_| CryptoError::MacVerificationFailed)
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MacKey").field(&"<redacted>").finish()
    }
}

impl Drop for MacKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::SeededPrng;

    #[test]
    fn test_compute_and_verify_tag() {
        let mut prng = SeededPrng::from_os_entropy();
        let key = MacKey::generate(&mut prng);
        let tag = key.compute_tag(b"payload").unwrap();
        assert_eq!(tag.len(), MAC_TAG_LENGTH);
        assert!(key.verify_tag(b"payload", &tag).is_ok());
        assert!(key.verify_tag(b"tampered", &tag).is_err());
    }

    #[test]
    fn test_tags_differ_across_keys() {
        let mut prng = SeededPrng::from_os_entropy();
        let key1 = MacKey::generate(&mut prng);
        let key2 = MacKey::generate(&mut prng);
        assert_ne!(
            key1.compute_tag(b"payload").unwrap(),
            key2.compute_tag(b"payload").unwrap()
        );
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(matches!(
            MacKey::from_bytes(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let mut prng = SeededPrng::from_os_entropy();
        let key = MacKey::generate(&mut prng);
        assert!(format!("{:?}", key).contains("<redacted>"));
    }
}
