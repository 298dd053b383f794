//! Session Manager.
//!
//! Creates, loads, revokes and expires authentication sessions. Sessions
//! are read fresh from the [`SessionStore`] on every call and returned by
//! value; nothing is cached between requests.

use std::sync::Arc;

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::OpResult;
use crate::authn::UpstreamIdentity;
use crate::error::OpError;
use crate::storage::{SessionStore, TokenStore};
use crate::types::{AuthnEvent, Client, Grant, Session, SessionState};

/// Creates and tracks authentication sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<dyn TokenStore>,
    lifetime: Duration,
    salt_size: usize,
}

impl SessionManager {
    /// Creates a manager over the given stores.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<dyn TokenStore>,
        lifetime: Duration,
        salt_size: usize,
    ) -> Self {
        Self {
            sessions,
            tokens,
            lifetime,
            salt_size,
        }
    }

    /// Default session lifetime.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Builds the authentication event for a backend-confirmed identity.
    #[must_use]
    pub fn authn_event(&self, identity: &UpstreamIdentity) -> AuthnEvent {
        AuthnEvent::new(
            identity.subject_id.clone(),
            identity.authn_method.clone(),
            identity.authn_time,
            self.salt_size,
        )
    }

    /// Creates a session for `subject` at `client` with the approved scopes.
    ///
    /// # Errors
    ///
    /// Returns `CapacityError` when the store cannot take another session.
    pub async fn create(
        &self,
        subject: &str,
        client: &Client,
        authn_event: AuthnEvent,
        scopes: Vec<String>,
    ) -> OpResult<Session> {
        self.create_with_attributes(subject, client, authn_event, scopes, Map::new(), None)
            .await
    }

    /// Creates a session carrying the backend-supplied user attributes and
    /// the nonce of the authorization request.
    ///
    /// The session is built completely before it is committed, so a
    /// failure leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns `CapacityError` when the store cannot take another session.
    pub async fn create_with_attributes(
        &self,
        subject: &str,
        client: &Client,
        authn_event: AuthnEvent,
        scopes: Vec<String>,
        attributes: Map<String, Value>,
        nonce: Option<String>,
    ) -> OpResult<Session> {
        let grant = Grant::new(client, scopes).with_attributes(attributes);
        let session = Session::new(subject, authn_event, grant, self.lifetime).with_nonce(nonce);

        if let Err(e) = self.purge_expired().await {
            warn!(error = %e, "Failed to purge expired sessions");
        }

        self.sessions.insert(session.clone()).await?;
        info!(
            session_id = %session.id,
            client_id = %session.client_id,
            "Session created"
        );
        Ok(session)
    }

    /// Loads a session.
    ///
    /// A revoked session loads successfully with state `Revoked`.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no session has this id and
    /// `SessionExpired` once its lifetime has elapsed.
    pub async fn load(&self, session_id: Uuid) -> OpResult<Session> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| OpError::session_not_found(session_id))?;

        match session.effective_state() {
            SessionState::Expired => Err(OpError::session_expired(session_id)),
            SessionState::Active | SessionState::Revoked => Ok(session),
        }
    }

    /// Loads a session and requires it to be active.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load), and `SessionNotFound` for revoked sessions.
    pub async fn load_active(&self, session_id: Uuid) -> OpResult<Session> {
        let session = self.load(session_id).await?;
        if session.is_revoked() {
            return Err(OpError::session_not_found(session_id));
        }
        Ok(session)
    }

    /// Reads the stored session without any state check.
    pub(crate) async fn snapshot(&self, session_id: Uuid) -> OpResult<Option<Session>> {
        self.sessions.get(session_id).await
    }

    /// Revokes a session and every token issued from it.
    ///
    /// Idempotent: revoking an unknown or already revoked session succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stores fail.
    pub async fn revoke(&self, session_id: Uuid) -> OpResult<()> {
        let updated = self
            .sessions
            .update(
                session_id,
                Box::new(|session: &mut Session| {
                    session.state = SessionState::Revoked;
                    Ok(())
                }),
            )
            .await?;

        let Some(session) = updated else {
            debug!(session_id = %session_id, "Revoke of unknown session ignored");
            return Ok(());
        };

        let token_ids: Vec<String> = session.tokens.iter().cloned().collect();
        let revoked = self.tokens.revoke_many(&token_ids).await?;
        info!(session_id = %session_id, tokens = revoked, "Session revoked");
        Ok(())
    }

    /// Records a newly issued token against its session and extends the
    /// session to cover the token lifetime.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session is gone or revoked and
    /// `SessionExpired` if it has expired.
    pub async fn attach_token(
        &self,
        session_id: Uuid,
        token_id: &str,
        token_expires_at: OffsetDateTime,
    ) -> OpResult<Session> {
        let token_id = token_id.to_string();
        self.sessions
            .update(
                session_id,
                Box::new(move |session: &mut Session| {
                    match session.effective_state() {
                        SessionState::Active => {}
                        SessionState::Expired => {
                            return Err(OpError::session_expired(session.id));
                        }
                        SessionState::Revoked => {
                            return Err(OpError::session_not_found(session.id));
                        }
                    }
                    session.tokens.insert(token_id);
                    if token_expires_at > session.expires_at {
                        session.expires_at = token_expires_at;
                    }
                    Ok(())
                }),
            )
            .await?
            .ok_or_else(|| OpError::session_not_found(session_id))
    }

    /// Removes a session that was created by a flow that later failed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn discard(&self, session_id: Uuid) -> OpResult<()> {
        if self.sessions.remove(session_id).await? {
            debug!(session_id = %session_id, "Session discarded");
        }
        Ok(())
    }

    /// Drops expired sessions and expired token records.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stores fail.
    pub async fn purge_expired(&self) -> OpResult<usize> {
        let now = OffsetDateTime::now_utc();
        let removed = self.sessions.purge_expired(now).await?;
        self.tokens.purge_expired(now).await?;
        if removed > 0 {
            debug!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    /// Number of stored sessions.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn count(&self) -> OpResult<usize> {
        self.sessions.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemorySessionStore, MemoryTokenStore};
    use crate::types::{SubjectType, TokenKind, TokenRecord};

    fn manager(capacity: usize) -> (SessionManager, Arc<MemoryTokenStore>) {
        let tokens = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(
            Arc::new(MemorySessionStore::new(capacity)),
            tokens.clone(),
            Duration::hours(1),
            8,
        );
        (manager, tokens)
    }

    fn client(id: &str) -> Client {
        Client::public(id, vec!["https://rp/cb".to_string()]).with_subject_type(SubjectType::Public)
    }

    fn event(manager: &SessionManager, uid: &str) -> AuthnEvent {
        manager.authn_event(&UpstreamIdentity::new(uid))
    }

    #[tokio::test]
    async fn test_create_then_load_preserves_subject_and_client() {
        let (manager, _) = manager(100);
        let cases = [
            ("u1", "c1", vec!["openid"]),
            ("u2", "c2", vec!["openid", "profile"]),
            ("alice@example.com", "spa", vec!["openid", "email", "phone"]),
        ];

        for (subject, client_id, scopes) in cases {
            let client = client(client_id);
            let scopes: Vec<String> = scopes.into_iter().map(String::from).collect();
            let created = manager
                .create(subject, &client, event(&manager, subject), scopes.clone())
                .await
                .unwrap();
            let loaded = manager.load(created.id).await.unwrap();
            assert_eq!(loaded.subject, subject);
            assert_eq!(loaded.client_id, client_id);
            assert_eq!(loaded.scopes(), scopes.as_slice());
        }
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let (manager, _) = manager(100);
        let c = client("c1");
        let a = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();
        let b = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_load_unknown_session() {
        let (manager, _) = manager(10);
        let err = manager.load(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OpError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_expired_session_reported_every_time() {
        let tokens = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(
            Arc::new(MemorySessionStore::new(10)),
            tokens,
            Duration::seconds(-1),
            8,
        );
        let c = client("c1");
        let session = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();

        for _ in 0..3 {
            let err = manager.load(session.id).await.unwrap_err();
            assert!(matches!(err, OpError::SessionExpired { .. }));
        }
    }

    #[tokio::test]
    async fn test_capacity_error() {
        let (manager, _) = manager(1);
        let c = client("c1");
        manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();
        let err = manager
            .create("u2", &c, event(&manager, "u2"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::CapacityError { .. }));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_revokes_tokens() {
        let (manager, tokens) = manager(10);
        let c = client("c1");
        let session = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        tokens
            .insert(TokenRecord {
                id: "t1".to_string(),
                kind: TokenKind::Access,
                session_id: session.id,
                client_id: "c1".to_string(),
                kid: "k".to_string(),
                scope: String::new(),
                issued_at: now,
                expires_at: now + Duration::minutes(5),
                revoked: false,
            })
            .await
            .unwrap();
        manager
            .attach_token(session.id, "t1", now + Duration::minutes(5))
            .await
            .unwrap();

        manager.revoke(session.id).await.unwrap();
        manager.revoke(session.id).await.unwrap();
        manager.revoke(Uuid::new_v4()).await.unwrap();

        let loaded = manager.load(session.id).await.unwrap();
        assert_eq!(loaded.state, SessionState::Revoked);
        assert!(tokens.get("t1").await.unwrap().unwrap().revoked);
        assert!(matches!(
            manager.load_active(session.id).await,
            Err(OpError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_attach_token_extends_session() {
        let (manager, _) = manager(10);
        let c = client("c1");
        let session = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();
        let later = session.expires_at + Duration::days(30);

        let updated = manager.attach_token(session.id, "r1", later).await.unwrap();
        assert!(updated.tokens.contains("r1"));
        assert_eq!(updated.expires_at, later);
    }

    #[tokio::test]
    async fn test_attach_token_to_revoked_session_fails() {
        let (manager, _) = manager(10);
        let c = client("c1");
        let session = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();
        manager.revoke(session.id).await.unwrap();

        let result = manager
            .attach_token(session.id, "t1", OffsetDateTime::now_utc())
            .await;
        assert!(result.is_err());
        assert!(manager.load(session.id).await.unwrap().tokens.is_empty());
    }

    #[tokio::test]
    async fn test_discard_removes_session() {
        let (manager, _) = manager(10);
        let c = client("c1");
        let session = manager
            .create("u1", &c, event(&manager, "u1"), vec![])
            .await
            .unwrap();
        manager.discard(session.id).await.unwrap();
        assert_eq!(manager.count().await.unwrap(), 0);
    }
}
