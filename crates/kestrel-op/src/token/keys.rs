//! Signing key ring with atomic rotation.
//!
//! The ring holds one active signing key plus a bounded list of previous
//! keys that are still published in the JWKS and accepted for verification.
//! Readers take a [`KeySet`] snapshot with a single atomic load and keep it
//! for the whole request, so a rotation never changes keys under an
//! in-flight request.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use super::jwt::{Jwks, JwtError, SigningKeyPair, peek_kid};

/// An immutable view of the ring at one point in time.
#[derive(Debug)]
pub struct KeySet {
    active: Arc<SigningKeyPair>,
    previous: Vec<Arc<SigningKeyPair>>,
}

impl KeySet {
    /// The key new tokens are signed with.
    #[must_use]
    pub fn active(&self) -> &SigningKeyPair {
        &self.active
    }

    /// Finds a key by id among the active and retained keys.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&SigningKeyPair> {
        std::iter::once(&self.active)
            .chain(self.previous.iter())
            .find(|key| key.kid == kid)
            .map(|key| &**key)
    }

    /// Signs `claims` with the active key.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        self.active.sign(claims)
    }

    /// Verifies `token` with the key its `kid` header names.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` when the key is not in this set, or the
    /// verification error of the key.
    pub fn verify<T: DeserializeOwned>(&self, token: &str, issuer: &str) -> Result<T, JwtError> {
        let kid = peek_kid(token)?;
        let key = self.find(&kid).ok_or_else(|| JwtError::key_not_found(&kid))?;
        key.verify(token, issuer)
    }

    /// Public keys of every key in the set, active first.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: std::iter::once(&self.active)
                .chain(self.previous.iter())
                .map(|key| key.to_jwk())
                .collect(),
        }
    }

    /// Number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.previous.len()
    }

    /// Always `false`, a set has an active key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Rotating signing keys behind an atomically swappable pointer.
pub struct KeyRing {
    inner: ArcSwap<KeySet>,
    keys_to_keep: usize,
}

impl KeyRing {
    /// Creates a ring with `active` as its only key.
    ///
    /// `keys_to_keep` bounds the total number of keys (active included)
    /// retained after a rotation. Values below 1 are treated as 1.
    #[must_use]
    pub fn new(active: SigningKeyPair, keys_to_keep: usize) -> Self {
        Self {
            inner: ArcSwap::from_pointee(KeySet {
                active: Arc::new(active),
                previous: Vec::new(),
            }),
            keys_to_keep: keys_to_keep.max(1),
        }
    }

    /// Takes a snapshot for one request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.inner.load_full()
    }

    /// Installs `key` as the active key.
    ///
    /// The previous active key is kept for verification until it falls out
    /// of the retention window.
    pub fn rotate(&self, key: SigningKeyPair) {
        let key = Arc::new(key);
        let kid = key.kid.clone();
        let keep_previous = self.keys_to_keep - 1;
        self.inner.rcu(|current| {
            let mut previous = Vec::with_capacity(keep_previous);
            previous.extend(
                std::iter::once(current.active.clone())
                    .chain(current.previous.iter().cloned())
                    .take(keep_previous),
            );
            KeySet {
                active: key.clone(),
                previous,
            }
        });
        info!(kid = %kid, "Signing key rotated");
    }

    /// JWKS of the current key set.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.snapshot().jwks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::jwt::{AccessTokenClaims, SigningAlgorithm};

    const ISSUER: &str = "https://op.example.com";

    fn key() -> SigningKeyPair {
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap()
    }

    fn claims() -> AccessTokenClaims {
        AccessTokenClaims {
            iss: ISSUER.to_string(),
            sub: "u1".to_string(),
            aud: "c1".to_string(),
            exp: i64::MAX / 2,
            iat: 0,
            jti: "t1".to_string(),
            sid: "s1".to_string(),
            client_id: "c1".to_string(),
            scope: "openid".to_string(),
            token_use: "access".to_string(),
        }
    }

    #[test]
    fn test_snapshot_survives_rotation() {
        let ring = KeyRing::new(key(), 2);
        let before = ring.snapshot();
        let token = before.sign(&claims()).unwrap();

        ring.rotate(key());
        let after = ring.snapshot();

        assert_ne!(before.active().kid, after.active().kid);
        // old tokens still verify against the new set
        assert!(after.verify::<AccessTokenClaims>(&token, ISSUER).is_ok());
    }

    #[test]
    fn test_retention_window() {
        let first = key();
        let first_kid = first.kid.clone();
        let ring = KeyRing::new(first, 2);
        ring.rotate(key());
        assert_eq!(ring.snapshot().len(), 2);
        assert!(ring.snapshot().find(&first_kid).is_some());

        ring.rotate(key());
        assert_eq!(ring.snapshot().len(), 2);
        assert!(ring.snapshot().find(&first_kid).is_none());
    }

    #[test]
    fn test_retired_key_tokens_rejected() {
        let ring = KeyRing::new(key(), 1);
        let token = ring.snapshot().sign(&claims()).unwrap();
        ring.rotate(key());
        assert!(matches!(
            ring.snapshot().verify::<AccessTokenClaims>(&token, ISSUER),
            Err(JwtError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_jwks_lists_active_first() {
        let ring = KeyRing::new(key(), 3);
        ring.rotate(key());
        let snapshot = ring.snapshot();
        let jwks = ring.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, snapshot.active().kid);
    }
}
