//! Issued token and authorization code records.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Token Kind
// =============================================================================

/// The type of a signed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Bearer access token for the userinfo endpoint.
    Access,
    /// Long-lived token for the refresh_token grant.
    Refresh,
    /// OpenID Connect ID token.
    Id,
}

impl TokenKind {
    /// Returns the `token_use` value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Id => "id",
        }
    }

    /// Returns the RFC 7662 `token_type` value.
    #[must_use]
    pub fn token_type(&self) -> &'static str {
        match self {
            Self::Access => "Bearer",
            Self::Refresh => "refresh_token",
            Self::Id => "id_token",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Token Record
// =============================================================================

/// Server-side record of an issued token, keyed by its `jti`.
///
/// Read-only once issued except for the revocation flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    /// Token id (`jti` claim).
    pub id: String,

    /// Token type.
    pub kind: TokenKind,

    /// Owning session.
    pub session_id: Uuid,

    /// Client the token was issued to.
    pub client_id: String,

    /// Id of the key that signed the token.
    pub kid: String,

    /// Space separated scopes carried by the token.
    pub scope: String,

    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Expiry time.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Set when the token (or its session) was revoked.
    #[serde(default)]
    pub revoked: bool,
}

impl TokenRecord {
    /// Returns `true` if the token had expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

// =============================================================================
// Authorization Code
// =============================================================================

/// A single-use authorization code bound to a session.
///
/// Only the SHA-256 hash of the code is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationCode {
    /// Hex SHA-256 of the code value.
    pub code_hash: String,

    /// Session the code was minted for.
    pub session_id: Uuid,

    /// Client the code was issued to.
    pub client_id: String,

    /// Redirect URI used in the authorization request.
    pub redirect_uri: String,

    /// Nonce from the authorization request, echoed in the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// S256 PKCE challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// When the code was minted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the code stops being redeemable.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When the code was redeemed.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub consumed_at: Option<OffsetDateTime>,
}

impl AuthorizationCode {
    /// Generates a cryptographically random code value.
    ///
    /// 32 random bytes, base64url encoded (43 characters).
    #[must_use]
    pub fn generate_code() -> String {
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Hashes a code value for storage and lookup.
    #[must_use]
    pub fn hash_code(code: &str) -> String {
        hex::encode(Sha256::digest(code.as_bytes()))
    }

    /// Returns `true` if the code lifetime has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Returns `true` if the code was already redeemed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_token_kind_names() {
        assert_eq!(TokenKind::Access.as_str(), "access");
        assert_eq!(TokenKind::Refresh.token_type(), "refresh_token");
        assert_eq!(
            serde_json::to_value(TokenKind::Id).unwrap(),
            serde_json::json!("id")
        );
    }

    #[test]
    fn test_generate_code() {
        let code = AuthorizationCode::generate_code();
        assert_eq!(code.len(), 43);
        assert_ne!(code, AuthorizationCode::generate_code());
    }

    #[test]
    fn test_hash_code_is_stable_hex() {
        let hash = AuthorizationCode::hash_code("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, AuthorizationCode::hash_code("abc"));
        assert_ne!(hash, AuthorizationCode::hash_code("abd"));
    }

    #[test]
    fn test_record_expiry() {
        let now = OffsetDateTime::now_utc();
        let record = TokenRecord {
            id: "t1".to_string(),
            kind: TokenKind::Access,
            session_id: Uuid::new_v4(),
            client_id: "c1".to_string(),
            kid: "k1".to_string(),
            scope: "openid".to_string(),
            issued_at: now,
            expires_at: now + Duration::seconds(10),
            revoked: false,
        };
        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(now + Duration::seconds(10)));
    }
}
