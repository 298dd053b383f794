//! Token Issuer.
//!
//! Mints ID, access and refresh tokens bound to a session, verifies them,
//! and mints and redeems authorization codes.
//!
//! Every request works against one [`KeySet`] snapshot obtained through
//! [`TokenIssuer::for_request`]. Tokens are JWTs whose `jti` keys a
//! [`TokenRecord`]; the record carries the revocation flag, so a token is
//! only valid while its record and session say so.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{
    AccessTokenClaims, IdTokenClaims, Jwks, RESERVED_ID_TOKEN_CLAIMS, RegisteredClaims,
    SigningKeyPair,
};
use super::keys::{KeyRing, KeySet};
use crate::OpResult;
use crate::claims::ClaimsResolver;
use crate::config::{TokenConfig, to_time_duration};
use crate::error::OpError;
use crate::flow::pkce::PkceChallenge;
use crate::session::SessionManager;
use crate::storage::{CodeStore, TokenStore};
use crate::types::{AuthorizationCode, Session, SessionState, TokenKind, TokenRecord};

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Server-side record.
    pub record: TokenRecord,
    /// Compact JWS serialization.
    pub value: String,
}

impl IssuedToken {
    /// Seconds until expiry, for `expires_in`.
    #[must_use]
    pub fn expires_in(&self) -> i64 {
        (self.record.expires_at - self.record.issued_at).whole_seconds()
    }
}

/// A token that passed verification, with the state it was checked against.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// The owning session.
    pub session: Session,
    /// The token record.
    pub record: TokenRecord,
}

/// Mints and verifies tokens.
pub struct TokenIssuer {
    issuer: String,
    keys: Arc<KeyRing>,
    sessions: SessionManager,
    tokens: Arc<dyn TokenStore>,
    codes: Arc<dyn CodeStore>,
    claims: Arc<ClaimsResolver>,
    config: TokenConfig,
}

impl TokenIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        keys: Arc<KeyRing>,
        sessions: SessionManager,
        tokens: Arc<dyn TokenStore>,
        codes: Arc<dyn CodeStore>,
        claims: Arc<ClaimsResolver>,
        config: TokenConfig,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            sessions,
            tokens,
            codes,
            claims,
            config,
        }
    }

    /// Issuer identifier written to `iss`.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Token lifetimes.
    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Binds the current key set to one request.
    #[must_use]
    pub fn for_request(&self) -> RequestIssuer<'_> {
        RequestIssuer {
            inner: self,
            keys: self.keys.snapshot(),
        }
    }

    /// Public keys for the JWKS endpoint.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }

    /// Installs a new active signing key.
    pub fn rotate_key(&self, key: SigningKeyPair) {
        self.keys.rotate(key);
    }

    /// Default lifetime for a token kind.
    #[must_use]
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        to_time_duration(match kind {
            TokenKind::Access => self.config.access_token_lifetime,
            TokenKind::Refresh => self.config.refresh_token_lifetime,
            TokenKind::Id => self.config.id_token_lifetime,
        })
    }

    /// Issues a token with a fresh key snapshot.
    ///
    /// # Errors
    ///
    /// See [`RequestIssuer::issue`].
    pub async fn issue(
        &self,
        session: &Session,
        kind: TokenKind,
        ttl: Option<Duration>,
    ) -> OpResult<IssuedToken> {
        self.for_request().issue(session, kind, ttl).await
    }

    /// Verifies a token with a fresh key snapshot.
    ///
    /// # Errors
    ///
    /// See [`RequestIssuer::verify`].
    pub async fn verify(&self, token: &str) -> OpResult<Session> {
        self.for_request().verify(token).await
    }

    /// Sets the revocation flag on one token.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn revoke_token(&self, token_id: &str) -> OpResult<()> {
        if self.tokens.revoke(token_id).await? {
            info!(jti = %token_id, "Token revoked");
        }
        Ok(())
    }

    /// Revokes a live token, returning `false` if it was already revoked or
    /// unknown. Used for single-use tokens such as rotated refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn consume_token(&self, token_id: &str) -> OpResult<bool> {
        let consumed = self.tokens.consume(token_id).await?;
        if consumed {
            debug!(jti = %token_id, "Token consumed");
        }
        Ok(consumed)
    }

    // -------------------------------------------------------------------------
    // Authorization codes
    // -------------------------------------------------------------------------

    /// Mints a single-use authorization code for `session`.
    ///
    /// Only the hash of the returned value is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the code store fails.
    pub async fn mint_code(
        &self,
        session: &Session,
        redirect_uri: &str,
        code_challenge: Option<&PkceChallenge>,
    ) -> OpResult<String> {
        let value = AuthorizationCode::generate_code();
        let now = OffsetDateTime::now_utc();
        self.codes
            .insert(AuthorizationCode {
                code_hash: AuthorizationCode::hash_code(&value),
                session_id: session.id,
                client_id: session.client_id.clone(),
                redirect_uri: redirect_uri.to_string(),
                nonce: session.nonce.clone(),
                code_challenge: code_challenge.map(|c| c.as_str().to_string()),
                created_at: now,
                expires_at: now + to_time_duration(self.config.authorization_code_lifetime),
                consumed_at: None,
            })
            .await?;
        debug!(session_id = %session.id, client_id = %session.client_id, "Authorization code minted");
        Ok(value)
    }

    /// Redeems an authorization code and returns its session.
    ///
    /// A code presented a second time revokes the session it was minted
    /// for, together with every token already issued from it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for unknown, used, expired or mismatched codes
    /// and for a failed PKCE check, and the session errors of
    /// [`SessionManager::load_active`].
    pub async fn redeem_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> OpResult<Session> {
        let Some(stored) = self
            .codes
            .consume(&AuthorizationCode::hash_code(code))
            .await?
        else {
            return Err(OpError::invalid_grant("authorization code is invalid"));
        };

        if stored.is_consumed() {
            warn!(
                session_id = %stored.session_id,
                client_id = %client_id,
                "Authorization code replayed, revoking session"
            );
            self.sessions.revoke(stored.session_id).await?;
            return Err(OpError::invalid_grant("authorization code was already used"));
        }
        if stored.is_expired() {
            return Err(OpError::invalid_grant("authorization code has expired"));
        }
        if stored.client_id != client_id {
            warn!(client_id = %client_id, "Authorization code presented by another client");
            return Err(OpError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        if redirect_uri != Some(stored.redirect_uri.as_str()) {
            return Err(OpError::invalid_grant(
                "redirect_uri does not match the authorization request",
            ));
        }

        match (stored.code_challenge, code_verifier) {
            (Some(challenge), Some(verifier)) => {
                PkceChallenge::from_stored(challenge).verify(verifier)?;
            }
            (Some(_), None) => return Err(OpError::invalid_grant("code_verifier is required")),
            (None, Some(_)) => {
                return Err(OpError::invalid_grant(
                    "code_verifier sent but no code_challenge was registered",
                ));
            }
            (None, None) => {}
        }

        self.sessions.load_active(stored.session_id).await
    }
}

/// An issuer bound to the key set of one request.
pub struct RequestIssuer<'a> {
    inner: &'a TokenIssuer,
    keys: Arc<KeySet>,
}

impl RequestIssuer<'_> {
    /// Id of the key this request signs with.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.keys.active().kid
    }

    /// Issues a token of `kind` for `session` carrying the session's scopes.
    ///
    /// `ttl` overrides the configured lifetime of the kind.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` / `SessionExpired` if the session is no
    /// longer active, and `Internal` if signing fails.
    pub async fn issue(
        &self,
        session: &Session,
        kind: TokenKind,
        ttl: Option<Duration>,
    ) -> OpResult<IssuedToken> {
        self.issue_with_scope(session, kind, ttl, session.scopes())
            .await
    }

    /// Issues an ID token with the nonce and the claims released for the
    /// session's scopes.
    ///
    /// # Errors
    ///
    /// As [`issue`](Self::issue).
    pub async fn issue_id_token(&self, session: &Session) -> OpResult<IssuedToken> {
        self.issue(session, TokenKind::Id, None).await
    }

    /// Issues a token carrying `scopes`, which must be granted scopes.
    ///
    /// # Errors
    ///
    /// As [`issue`](Self::issue), and `InvalidRequest` for ungranted scopes.
    pub async fn issue_with_scope(
        &self,
        session: &Session,
        kind: TokenKind,
        ttl: Option<Duration>,
        scopes: &[String],
    ) -> OpResult<IssuedToken> {
        if let Some(scope) = scopes.iter().find(|s| !session.grant.has_scope(s)) {
            return Err(OpError::invalid_request(format!(
                "scope '{scope}' was not granted"
            )));
        }

        let issuer = self.inner;
        let now = OffsetDateTime::now_utc();
        let expires_at = now + ttl.unwrap_or_else(|| issuer.ttl(kind));
        let jti = Uuid::new_v4().to_string();
        let sub = issuer.claims.subject(session);
        let scope = scopes.join(" ");

        let value = match kind {
            TokenKind::Access | TokenKind::Refresh => self.keys.sign(&AccessTokenClaims {
                iss: issuer.issuer.clone(),
                sub,
                aud: session.client_id.clone(),
                exp: expires_at.unix_timestamp(),
                iat: now.unix_timestamp(),
                jti: jti.clone(),
                sid: session.id.to_string(),
                client_id: session.client_id.clone(),
                scope: scope.clone(),
                token_use: kind.as_str().to_string(),
            }),
            TokenKind::Id => {
                let mut claims = issuer.claims.resolve(session, scopes);
                for reserved in RESERVED_ID_TOKEN_CLAIMS {
                    claims.remove(*reserved);
                }
                self.keys.sign(&IdTokenClaims {
                    iss: issuer.issuer.clone(),
                    sub,
                    aud: session.client_id.clone(),
                    exp: expires_at.unix_timestamp(),
                    iat: now.unix_timestamp(),
                    jti: jti.clone(),
                    sid: session.id.to_string(),
                    auth_time: session.authn_event.authn_time.unix_timestamp(),
                    nonce: session.nonce.clone(),
                    claims,
                })
            }
        }?;

        let record = TokenRecord {
            id: jti.clone(),
            kind,
            session_id: session.id,
            client_id: session.client_id.clone(),
            kid: self.kid().to_string(),
            scope,
            issued_at: now,
            expires_at,
            revoked: false,
        };
        issuer.tokens.insert(record.clone()).await?;

        if let Err(e) = issuer
            .sessions
            .attach_token(session.id, &jti, expires_at)
            .await
        {
            // the session went away while signing, the token must not outlive it
            issuer.tokens.revoke(&jti).await?;
            return Err(e);
        }

        info!(
            jti = %jti,
            kind = %kind,
            session_id = %session.id,
            client_id = %session.client_id,
            "Token issued"
        );
        Ok(IssuedToken { record, value })
    }

    /// Verifies a token and returns its session.
    ///
    /// # Errors
    ///
    /// Returns `SignatureInvalid`, `TokenRevoked` or `TokenExpired`.
    pub async fn verify(&self, token: &str) -> OpResult<Session> {
        self.verify_token(token).await.map(|v| v.session)
    }

    /// Verifies a token and returns its session and record.
    ///
    /// Checks run in a fixed order: signature and issuer, record lookup,
    /// revocation of the token or its session, then expiry. Nothing is
    /// written, so verifying the same token again gives the same answer.
    ///
    /// # Errors
    ///
    /// Returns `SignatureInvalid`, `TokenRevoked` or `TokenExpired`.
    pub async fn verify_token(&self, token: &str) -> OpResult<VerifiedToken> {
        let issuer = self.inner;
        let registered: RegisteredClaims = self.keys.verify(token, &issuer.issuer)?;
        let now = OffsetDateTime::now_utc();

        let Some(record) = issuer.tokens.get(&registered.jti).await? else {
            // expired records may have been purged; the signed exp still tells
            if registered.exp <= now.unix_timestamp() {
                return Err(OpError::TokenExpired);
            }
            debug!(jti = %registered.jti, "Token has no record");
            return Err(OpError::SignatureInvalid);
        };

        if record.revoked {
            return Err(OpError::TokenRevoked);
        }

        let Some(session) = issuer.sessions.snapshot(record.session_id).await? else {
            return Err(if record.is_expired_at(now) {
                OpError::TokenExpired
            } else {
                OpError::TokenRevoked
            });
        };
        if session.state == SessionState::Revoked {
            return Err(OpError::TokenRevoked);
        }

        if record.is_expired_at(now) || session.is_expired_at(now) {
            return Err(OpError::TokenExpired);
        }

        Ok(VerifiedToken { session, record })
    }
}
