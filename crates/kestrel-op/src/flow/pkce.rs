//! Proof Key for Code Exchange (RFC 7636), S256 only.
//!
//! The challenge is stored with the authorization code and checked against
//! the `code_verifier` sent to the token endpoint.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::error::OpError;

/// PKCE failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside 43..=128.
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside `[A-Za-z0-9-._~]`.
    #[error("Invalid verifier characters")]
    InvalidVerifierCharacters,

    /// Challenge is not a base64url SHA-256 digest.
    #[error("Invalid code_challenge: must be 43 base64url characters")]
    InvalidChallengeFormat,

    /// Only S256 is accepted.
    #[error("Unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),

    /// The verifier does not hash to the stored challenge.
    #[error("code_verifier does not match code_challenge")]
    VerificationFailed,
}

impl From<PkceError> for OpError {
    fn from(err: PkceError) -> Self {
        match err {
            PkceError::VerificationFailed | PkceError::InvalidVerifierLength(_)
            | PkceError::InvalidVerifierCharacters => OpError::invalid_grant(err.to_string()),
            PkceError::InvalidChallengeFormat | PkceError::UnsupportedMethod(_) => {
                OpError::invalid_request(err.to_string())
            }
        }
    }
}

/// A validated S256 code challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Validates a challenge and its method from an authorization request.
    ///
    /// A missing method means `plain` per RFC 7636 and is rejected.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMethod` unless the method is `S256`, and
    /// `InvalidChallengeFormat` for a malformed challenge.
    pub fn parse(challenge: &str, method: Option<&str>) -> Result<Self, PkceError> {
        match method {
            Some("S256") => {}
            Some(other) => return Err(PkceError::UnsupportedMethod(other.to_string())),
            None => return Err(PkceError::UnsupportedMethod("plain".to_string())),
        }
        // 32-byte digest, base64url without padding
        match URL_SAFE_NO_PAD.decode(challenge) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self(challenge.to_string())),
            _ => Err(PkceError::InvalidChallengeFormat),
        }
    }

    /// Computes the challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &str) -> Self {
        Self(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())))
    }

    /// Checks `verifier` against this challenge.
    ///
    /// # Errors
    ///
    /// Returns the verifier format error or `VerificationFailed`.
    pub fn verify(&self, verifier: &str) -> Result<(), PkceError> {
        validate_verifier(verifier)?;
        if Self::from_verifier(verifier).0 == self.0 {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// The challenge string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a challenge that was validated when it was stored.
    #[must_use]
    pub(crate) fn from_stored(challenge: String) -> Self {
        Self(challenge)
    }
}

fn validate_verifier(verifier: &str) -> Result<(), PkceError> {
    let len = verifier.len();
    if !(43..=128).contains(&len) {
        return Err(PkceError::InvalidVerifierLength(len));
    }
    if !verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
    {
        return Err(PkceError::InvalidVerifierCharacters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc_vector() {
        assert_eq!(PkceChallenge::from_verifier(VERIFIER).as_str(), CHALLENGE);
        let challenge = PkceChallenge::parse(CHALLENGE, Some("S256")).unwrap();
        assert!(challenge.verify(VERIFIER).is_ok());
    }

    #[test]
    fn test_wrong_verifier() {
        let challenge = PkceChallenge::parse(CHALLENGE, Some("S256")).unwrap();
        let other = "a".repeat(43);
        assert_eq!(challenge.verify(&other), Err(PkceError::VerificationFailed));
    }

    #[test]
    fn test_plain_rejected() {
        assert!(matches!(
            PkceChallenge::parse(CHALLENGE, Some("plain")),
            Err(PkceError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            PkceChallenge::parse(CHALLENGE, None),
            Err(PkceError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_malformed_challenge() {
        assert_eq!(
            PkceChallenge::parse("short", Some("S256")),
            Err(PkceError::InvalidChallengeFormat)
        );
    }

    #[test]
    fn test_verifier_bounds() {
        let challenge = PkceChallenge::parse(CHALLENGE, Some("S256")).unwrap();
        assert_eq!(
            challenge.verify(&"a".repeat(42)),
            Err(PkceError::InvalidVerifierLength(42))
        );
        assert_eq!(
            challenge.verify(&format!("{}!", "a".repeat(42))),
            Err(PkceError::InvalidVerifierCharacters)
        );
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            OpError::from(PkceError::VerificationFailed).oauth_error_code(),
            "invalid_grant"
        );
        assert_eq!(
            OpError::from(PkceError::InvalidChallengeFormat).oauth_error_code(),
            "invalid_request"
        );
    }
}
