//! Administrators chain
//!
//! An append-only signed log establishing authority lineage over a
//! Group V2. Each entry names the full administrator set at that
//! point and is signed by an administrator of the previous entry
//! (the genesis entry is self-signed). The last entry determines the
//! current administrators.

use serde::{Deserialize, Serialize};

use crate::core_crypto::{CryptoError, Keypair};
use crate::errors::{EngineResult, IdentityEngineError};

/// One signed administrator-change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// BLAKE3 hash of the previous entry ([0; 32] for genesis)
    pub prev_entry_hash: [u8; 32],
    /// Ed25519 signing public keys of the administrators after this event
    pub administrators: Vec<Vec<u8>>,
    /// Public key of the administrator who signed this entry
    pub signer: Vec<u8>,
    /// Signature over the entry payload
    pub signature: Vec<u8>,
}

impl ChainEntry {
    fn payload(prev_entry_hash: &[u8; 32], administrators: &[Vec<u8>]) -> Result<Vec<u8>, CryptoError> {
        bincode::serialize(&(prev_entry_hash, administrators))
            .map_err(|e| CryptoError::SealFailed(e.to_string()))
    }

    /// Hash of this entry, chained into the next one
    pub fn entry_hash(&self) -> EngineResult<[u8; 32]> {
        let bytes = bincode::serialize(self)?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}

/// Append-only signed sequence of administrator sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministratorsChain {
    entries: Vec<ChainEntry>,
}

impl AdministratorsChain {
    /// Start a chain with a single self-signed entry
    pub fn genesis(first_admin: &Keypair, administrators: Vec<Vec<u8>>) -> EngineResult<Self> {
        let prev = [0u8; 32];
        let payload = ChainEntry::payload(&prev, &administrators)?;
        let signature = first_admin.sign(&payload)?;
        Ok(AdministratorsChain {
            entries: vec![ChainEntry {
                prev_entry_hash: prev,
                administrators,
                signer: first_admin.public_key().to_vec(),
                signature,
            }],
        })
    }

    /// Append an administrator-change event, returning the extended
    /// chain. The signer must be an administrator of the current head.
    pub fn append(
        &self,
        signer: &Keypair,
        administrators: Vec<Vec<u8>>,
    ) -> EngineResult<AdministratorsChain> {
        let head = self.entries.last().ok_or_else(|| {
            IdentityEngineError::ConsistencyFault("administrators chain is empty".to_string())
        })?;
        if !head
            .administrators
            .iter()
            .any(|admin| admin.as_slice() == signer.public_key())
        {
            return Err(CryptoError::SignatureVerificationFailed.into());
        }
        let prev = head.entry_hash()?;
        let payload = ChainEntry::payload(&prev, &administrators)?;
        let signature = signer.sign(&payload)?;
        let mut entries = self.entries.clone();
        entries.push(ChainEntry {
            prev_entry_hash: prev,
            administrators,
            signer: signer.public_key().to_vec(),
            signature,
        });
        Ok(AdministratorsChain { entries })
    }

    /// Pure validation of the whole chain: hash linkage, signer
    /// membership, signature of every entry.
    pub fn validate(&self) -> EngineResult<()> {
        if self.entries.is_empty() {
            return Err(IdentityEngineError::ConsistencyFault(
                "administrators chain is empty".to_string(),
            ));
        }
        let mut prev: Option<&ChainEntry> = None;
        for entry in &self.entries {
            let expected_prev = match prev {
                None => [0u8; 32],
                Some(previous) => previous.entry_hash()?,
            };
            if entry.prev_entry_hash != expected_prev {
                return Err(CryptoError::SignatureVerificationFailed.into());
            }

            // Genesis is self-signed; later entries are signed by an
            // administrator of the previous entry.
            let authorized = match prev {
                None => &entry.administrators,
                Some(previous) => &previous.administrators,
            };
            if !authorized
                .iter()
                .any(|admin| admin.as_slice() == entry.signer.as_slice())
            {
                return Err(CryptoError::SignatureVerificationFailed.into());
            }

            let payload = ChainEntry::payload(&entry.prev_entry_hash, &entry.administrators)?;
            if !Keypair::verify(&entry.signer, &payload, &entry.signature) {
                return Err(CryptoError::SignatureVerificationFailed.into());
            }
            prev = Some(entry);
        }
        Ok(())
    }

    /// Whether `other` has the same genesis entry (same group lineage)
    pub fn shares_lineage_with(&self, other: &AdministratorsChain) -> bool {
        match (self.entries.first(), other.entries.first()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Administrator public keys established by the last entry
    pub fn current_administrators(&self) -> &[Vec<u8>] {
        match self.entries.last() {
            Some(head) => &head.administrators,
            None => &[],
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw entries, oldest first
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }
}
