//! Keycloak trust overlay
//!
//! Binds an owned identity to an external identity provider. The
//! provider vouches for user details with signatures and distributes
//! signed revocations; this module owns that state and the
//! verification rules. Signature failures here are always local and
//! recoverable: a detail record that does not verify is simply "not
//! certified", never a transaction failure.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::core_crypto::{CryptoError, Keypair};
use crate::core_identity::IdentityId;
use crate::errors::EngineResult;

/// Binding parameters handed over when an owned identity is attached
/// to a keycloak server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeycloakState {
    pub server_url: String,
    /// Ed25519 key the server signs details and revocations with
    pub signature_verification_key: Option<Vec<u8>>,
    /// Opaque OAuth/OIDC auth state blob
    pub raw_auth_state: Option<Vec<u8>>,
    /// Opaque JWKS blob cached from the server
    pub jwks: Option<Vec<u8>>,
}

/// Detail payload the keycloak server signs for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetailsPayload {
    /// Identity the details belong to
    pub identity: IdentityId,
    pub name: String,
    pub position: Option<String>,
    pub company: Option<String>,
    /// When the server produced the signature (unix seconds)
    pub timestamp: u64,
}

/// User details signed by a keycloak server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUserDetails {
    pub payload: UserDetailsPayload,
    pub signature: Vec<u8>,
}

impl SignedUserDetails {
    /// Sign a payload (test/server side)
    pub fn sign(payload: UserDetailsPayload, key: &Keypair) -> EngineResult<Self> {
        let bytes = serde_json::to_vec(&payload)?;
        let signature = key.sign(&bytes)?;
        Ok(SignedUserDetails { payload, signature })
    }

    /// Verify the signature against a server verification key
    pub fn verify(&self, verification_key: &[u8]) -> bool {
        match serde_json::to_vec(&self.payload) {
            Ok(bytes) => Keypair::verify(verification_key, &bytes, &self.signature),
            Err(_) => false,
        }
    }

    /// Whether the signature fell out of the validity window
    pub fn is_expired(&self, now: u64, validity_secs: u64) -> bool {
        self.payload.timestamp.saturating_add(validity_secs) < now
    }
}

/// Why an identity was revoked by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationKind {
    /// The user left the managed directory; not a security event
    LeftCompany,
    /// The user's key is compromised; distrust immediately
    Compromised,
}

/// Revocation payload signed by the keycloak server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationPayload {
    pub identity: IdentityId,
    pub kind: RevocationKind,
    pub timestamp: u64,
}

/// A signed revocation, transported as a JSON string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRevocation {
    pub payload: RevocationPayload,
    pub signature: Vec<u8>,
}

impl SignedRevocation {
    pub fn sign(payload: RevocationPayload, key: &Keypair) -> EngineResult<Self> {
        let bytes = serde_json::to_vec(&payload)?;
        let signature = key.sign(&bytes)?;
        Ok(SignedRevocation { payload, signature })
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and verify one signed revocation. Returns the payload on
    /// success, a crypto error otherwise; callers downgrade failures
    /// to a skip.
    pub fn parse_and_verify(
        json: &str,
        verification_key: &[u8],
    ) -> Result<RevocationPayload, CryptoError> {
        let signed: SignedRevocation = serde_json::from_str(json)
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;
        let bytes = serde_json::to_vec(&signed.payload)
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;
        if !Keypair::verify(verification_key, &bytes, &signed.signature) {
            return Err(CryptoError::SignatureVerificationFailed);
        }
        Ok(signed.payload)
    }
}

/// A recorded, verified revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeycloakRevocation {
    pub kind: RevocationKind,
    pub timestamp: u64,
}

/// State of the keycloak server managing one owned identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeycloakServer {
    pub server_url: String,
    /// The keycloak-side user id of the owned identity
    pub user_id: String,
    pub signature_verification_key: Option<Vec<u8>>,
    pub raw_auth_state: Option<Vec<u8>>,
    pub jwks: Option<Vec<u8>>,
    /// Topics the server pushes to for this identity
    pub push_topics: BTreeSet<String>,
    /// Nonce used to probe whether we were revoked ourselves.
    /// Preserved across re-binding; only an explicit setter changes it.
    pub self_revocation_test_nonce: Option<String>,
    /// Verified revocations, keyed by the revoked identity
    pub revocations: BTreeMap<IdentityId, KeycloakRevocation>,
    /// Server timestamp of the last applied revocation list
    pub latest_revocation_list_timestamp: Option<u64>,
}

impl KeycloakServer {
    pub fn new(state: KeycloakState, user_id: &str) -> Self {
        KeycloakServer {
            server_url: state.server_url,
            user_id: user_id.to_string(),
            signature_verification_key: state.signature_verification_key,
            raw_auth_state: state.raw_auth_state,
            jwks: state.jwks,
            push_topics: BTreeSet::new(),
            self_revocation_test_nonce: None,
            revocations: BTreeMap::new(),
            latest_revocation_list_timestamp: None,
        }
    }

    /// The binding parameters corresponding to the stored state
    pub fn state(&self) -> KeycloakState {
        KeycloakState {
            server_url: self.server_url.clone(),
            signature_verification_key: self.signature_verification_key.clone(),
            raw_auth_state: self.raw_auth_state.clone(),
            jwks: self.jwks.clone(),
        }
    }

    /// Replace the push-topic set. Returns whether the stored set
    /// changed, so callers can skip redundant server registrations.
    pub fn update_push_topics(&mut self, push_topics: BTreeSet<String>) -> bool {
        if self.push_topics == push_topics {
            return false;
        }
        debug!(
            server = %self.server_url,
            topics = push_topics.len(),
            "updating keycloak push topics"
        );
        self.push_topics = push_topics;
        true
    }

    /// Verify a batch of signed revocations and record the valid
    /// ones. Invalid entries are skipped with a warning. Returns the
    /// payloads newly recorded.
    pub fn add_verified_revocations(&mut self, signed_revocations: &[String]) -> Vec<RevocationPayload> {
        let key = match &self.signature_verification_key {
            Some(key) => key.clone(),
            None => {
                warn!(server = %self.server_url, "no signature verification key; revocation list ignored");
                return Vec::new();
            }
        };

        let mut accepted = Vec::new();
        for json in signed_revocations {
            match SignedRevocation::parse_and_verify(json, &key) {
                Ok(payload) => {
                    self.revocations.insert(
                        payload.identity,
                        KeycloakRevocation {
                            kind: payload.kind,
                            timestamp: payload.timestamp,
                        },
                    );
                    accepted.push(payload);
                }
                Err(_) => {
                    warn!(server = %self.server_url, "skipping revocation with invalid signature");
                }
            }
        }
        accepted
    }

    /// Drop revocations that predate the safety window below the
    /// latest list timestamp. Anything older can no longer match a
    /// valid signature anyway.
    pub fn prune_old_revocations(&mut self, validity_secs: u64) {
        let latest = match self.latest_revocation_list_timestamp {
            Some(latest) => latest,
            None => return,
        };
        let cutoff = latest.saturating_sub(validity_secs);
        self.revocations
            .retain(|_, revocation| revocation.timestamp >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::{KeyType, SeededPrng};

    fn state_with_key(key: &Keypair) -> KeycloakState {
        KeycloakState {
            server_url: "https://kc.example.org".to_string(),
            signature_verification_key: Some(key.public_key().to_vec()),
            raw_auth_state: None,
            jwks: None,
        }
    }

    fn server_key() -> Keypair {
        let mut prng = SeededPrng::from_os_entropy();
        Keypair::generate(KeyType::Ed25519, &mut prng)
    }

    fn signed_revocation(key: &Keypair, identity: IdentityId, kind: RevocationKind, ts: u64) -> String {
        SignedRevocation::sign(
            RevocationPayload {
                identity,
                kind,
                timestamp: ts,
            },
            key,
        )
        .unwrap()
        .to_json()
        .unwrap()
    }

    #[test]
    fn test_signed_user_details_verify_and_expiry() {
        let key = server_key();
        let details = SignedUserDetails::sign(
            UserDetailsPayload {
                identity: IdentityId::from_bytes([1; 32]),
                name: "alice".to_string(),
                position: None,
                company: Some("acme".to_string()),
                timestamp: 1_000,
            },
            &key,
        )
        .unwrap();

        assert!(details.verify(key.public_key()));
        assert!(!details.verify(server_key().public_key()));
        assert!(!details.is_expired(1_500, 600));
        assert!(details.is_expired(2_000, 600));
    }

    #[test]
    fn test_invalid_revocations_are_skipped_not_fatal() {
        let key = server_key();
        let rogue = server_key();
        let mut server = KeycloakServer::new(state_with_key(&key), "user-1");

        let valid = signed_revocation(&key, IdentityId::from_bytes([2; 32]), RevocationKind::Compromised, 100);
        let forged = signed_revocation(&rogue, IdentityId::from_bytes([3; 32]), RevocationKind::Compromised, 100);
        let garbage = "not even json".to_string();

        let accepted = server.add_verified_revocations(&[valid, forged, garbage]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(server.revocations.len(), 1);
        assert!(server
            .revocations
            .contains_key(&IdentityId::from_bytes([2; 32])));
    }

    #[test]
    fn test_prune_drops_only_stale_revocations() {
        let key = server_key();
        let mut server = KeycloakServer::new(state_with_key(&key), "user-1");
        let old = signed_revocation(&key, IdentityId::from_bytes([4; 32]), RevocationKind::LeftCompany, 100);
        let fresh = signed_revocation(&key, IdentityId::from_bytes([5; 32]), RevocationKind::Compromised, 900);
        server.add_verified_revocations(&[old, fresh]);

        server.latest_revocation_list_timestamp = Some(1_000);
        server.prune_old_revocations(500);
        assert_eq!(server.revocations.len(), 1);
        assert!(server
            .revocations
            .contains_key(&IdentityId::from_bytes([5; 32])));
    }

    #[test]
    fn test_push_topic_update_reports_change() {
        let key = server_key();
        let mut server = KeycloakServer::new(state_with_key(&key), "user-1");
        let topics: BTreeSet<_> = ["alpha".to_string(), "beta".to_string()].into();
        assert!(server.update_push_topics(topics.clone()));
        assert!(!server.update_push_topics(topics));
        assert!(server.update_push_topics(BTreeSet::new()));
    }
}
