//! Userinfo endpoint flow (OpenID Connect Core 5.3).

use serde_json::{Map, Value};
use tracing::debug;

use super::{SingleShotState, split_scope};
use crate::OpResult;
use crate::error::OpError;
use crate::provider::Provider;
use crate::types::TokenKind;

/// Extracts the token from an `Authorization: Bearer` header value.
#[must_use]
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// One userinfo request in flight.
pub struct UserinfoFlow<'a> {
    provider: &'a Provider,
    state: SingleShotState,
}

impl<'a> UserinfoFlow<'a> {
    /// Starts a flow in the `Received` state.
    #[must_use]
    pub fn new(provider: &'a Provider) -> Self {
        Self {
            provider,
            state: SingleShotState::Received,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SingleShotState {
        self.state
    }

    /// Returns the claims released for the access token's scopes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when no token is presented or the token
    /// lacks the `openid` scope, and the verification errors of the issuer.
    pub async fn run(&mut self, access_token: Option<&str>) -> OpResult<Map<String, Value>> {
        let result = self.process(access_token).await;
        self.state = match result {
            Ok(_) => SingleShotState::ResponseBuilt,
            Err(_) => SingleShotState::Error,
        };
        result
    }

    async fn process(&mut self, access_token: Option<&str>) -> OpResult<Map<String, Value>> {
        let token =
            access_token.ok_or_else(|| OpError::invalid_request("access token is required"))?;

        let verified = self.provider.issuer().for_request().verify_token(token).await?;
        if verified.record.kind != TokenKind::Access {
            debug!(jti = %verified.record.id, kind = %verified.record.kind, "Not an access token");
            return Err(OpError::SignatureInvalid);
        }
        self.state = SingleShotState::Authorized;

        let scopes = split_scope(&verified.record.scope);
        if !scopes.iter().any(|s| s == "openid") {
            return Err(OpError::invalid_request(
                "access token was not issued for the openid scope",
            ));
        }

        debug!(
            client_id = %verified.record.client_id,
            session_id = %verified.session.id,
            "Userinfo request"
        );
        Ok(self.provider.claims().resolve(&verified.session, &scopes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authn::{StaticBackend, UpstreamIdentity};
    use crate::config::ProviderConfig;
    use crate::types::{Client, SubjectType};

    async fn fixture(scopes: &[&str]) -> (Provider, crate::types::Session) {
        let provider = Provider::builder(ProviderConfig::default())
            .backend(Arc::new(StaticBackend::new(UpstreamIdentity::new("u1"))))
            .build()
            .unwrap();
        let client = Client::public("c1", vec!["https://rp/cb".to_string()])
            .with_subject_type(SubjectType::Public);
        let identity = UpstreamIdentity::new("u1")
            .with_attribute("name", "User One")
            .with_attribute("email", "u1@example.com");
        let sessions = provider.sessions();
        let session = sessions
            .create_with_attributes(
                "u1",
                &client,
                sessions.authn_event(&identity),
                scopes.iter().map(|s| s.to_string()).collect(),
                identity.attributes,
                None,
            )
            .await
            .unwrap();
        (provider, session)
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[tokio::test]
    async fn test_claims_for_token_scope() {
        let (provider, session) = fixture(&["openid", "profile"]).await;
        let access = provider
            .issuer()
            .issue(&session, TokenKind::Access, None)
            .await
            .unwrap();

        let mut flow = UserinfoFlow::new(&provider);
        let claims = flow.run(Some(&access.value)).await.unwrap();
        assert_eq!(flow.state(), SingleShotState::ResponseBuilt);
        assert_eq!(claims["sub"], "u1");
        assert_eq!(claims["name"], "User One");
        assert!(!claims.contains_key("email"));
    }

    #[tokio::test]
    async fn test_missing_and_wrong_tokens() {
        let (provider, session) = fixture(&["openid"]).await;

        let mut flow = UserinfoFlow::new(&provider);
        assert!(matches!(
            flow.run(None).await,
            Err(OpError::InvalidRequest { .. })
        ));
        assert_eq!(flow.state(), SingleShotState::Error);

        let id_token = provider
            .issuer()
            .issue(&session, TokenKind::Id, None)
            .await
            .unwrap();
        assert!(matches!(
            UserinfoFlow::new(&provider).run(Some(&id_token.value)).await,
            Err(OpError::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_revoked_session() {
        let (provider, session) = fixture(&["openid"]).await;
        let access = provider
            .issuer()
            .issue(&session, TokenKind::Access, None)
            .await
            .unwrap();
        provider.sessions().revoke(session.id).await.unwrap();

        assert!(matches!(
            UserinfoFlow::new(&provider).run(Some(&access.value)).await,
            Err(OpError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_token_without_openid_scope() {
        let (provider, session) = fixture(&["openid", "email"]).await;
        let access = provider
            .issuer()
            .for_request()
            .issue_with_scope(&session, TokenKind::Access, None, &["email".to_string()])
            .await
            .unwrap();
        assert!(matches!(
            UserinfoFlow::new(&provider).run(Some(&access.value)).await,
            Err(OpError::InvalidRequest { .. })
        ));
    }
}
