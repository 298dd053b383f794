//! Token endpoint flow.
//!
//! Supports the `authorization_code` and `refresh_token` grants. The flow
//! is single-shot: the client is authenticated, the grant is checked and
//! the response is built, or the flow ends in `Error`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{SingleShotState, split_scope};
use crate::OpResult;
use crate::error::OpError;
use crate::provider::Provider;
use crate::registry::ClientCredentials;
use crate::token::{IssuedToken, RequestIssuer};
use crate::types::{Client, GrantType, Session, TokenKind};

/// Token request form parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenRequest {
    /// `authorization_code` or `refresh_token`.
    pub grant_type: Option<String>,
    /// Authorization code (code grant).
    pub code: Option<String>,
    /// Redirect URI used in the authorization request (code grant).
    pub redirect_uri: Option<String>,
    /// PKCE verifier (code grant).
    pub code_verifier: Option<String>,
    /// Refresh token (refresh grant).
    pub refresh_token: Option<String>,
    /// Narrowed scope (refresh grant).
    pub scope: Option<String>,
    /// Client id (`client_secret_post` or public clients).
    pub client_id: Option<String>,
    /// Client secret (`client_secret_post`).
    pub client_secret: Option<String>,
}

/// Successful token response (RFC 6749 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// Always `Bearer`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: i64,

    /// ID token, present when `openid` is in scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token, present when the client may refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scope.
    pub scope: String,
}

impl TokenResponse {
    fn new(access: &IssuedToken) -> Self {
        Self {
            access_token: access.value.clone(),
            token_type: access.record.kind.token_type().to_string(),
            expires_in: access.expires_in(),
            id_token: None,
            refresh_token: None,
            scope: access.record.scope.clone(),
        }
    }
}

/// One token request in flight.
pub struct TokenFlow<'a> {
    provider: &'a Provider,
    state: SingleShotState,
}

impl<'a> TokenFlow<'a> {
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

    /// Runs the token request.
    ///
    /// `authorization` is the raw `Authorization` header, if any.
    ///
    /// # Errors
    ///
    /// Returns the client authentication errors of the registry,
    /// `UnsupportedGrantType`, `InvalidGrant`, and for a presented refresh
    /// token the verification errors of the issuer.
    pub async fn run(
        &mut self,
        request: TokenRequest,
        authorization: Option<&str>,
    ) -> OpResult<TokenResponse> {
        let result = self.process(request, authorization).await;
        self.state = match result {
            Ok(_) => SingleShotState::ResponseBuilt,
            Err(_) => SingleShotState::Error,
        };
        result
    }

    async fn process(
        &mut self,
        request: TokenRequest,
        authorization: Option<&str>,
    ) -> OpResult<TokenResponse> {
        let credentials = ClientCredentials::from_request(
            authorization,
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        );
        let client = self.provider.registry().authenticate(&credentials).await?;
        self.state = SingleShotState::Authorized;

        let grant_type = request
            .grant_type
            .as_deref()
            .ok_or_else(|| OpError::invalid_request("grant_type is required"))?;
        let grant_type: GrantType = grant_type
            .parse()
            .map_err(|_| OpError::unsupported_grant_type(grant_type))?;
        self.provider
            .registry()
            .check_grant_type(&client, grant_type)?;
        debug!(client_id = %client.client_id, grant_type = %grant_type, "Token request");

        match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(&client, request).await,
            GrantType::RefreshToken => self.refresh(&client, request).await,
        }
    }

    async fn exchange_code(&self, client: &Client, request: TokenRequest) -> OpResult<TokenResponse> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| OpError::invalid_request("code is required"))?;

        let issuer = self.provider.issuer();
        let session = issuer
            .redeem_code(
                code,
                &client.client_id,
                request.redirect_uri.as_deref(),
                request.code_verifier.as_deref(),
            )
            .await?;

        let tokens = issuer.for_request();
        match self.issue_all(&tokens, client, &session).await {
            Ok(response) => {
                info!(
                    client_id = %client.client_id,
                    session_id = %session.id,
                    "Authorization code exchanged"
                );
                Ok(response)
            }
            Err(e) => {
                // partially issued tokens must not stay usable
                self.provider.sessions().revoke(session.id).await?;
                Err(e)
            }
        }
    }

    async fn issue_all(
        &self,
        tokens: &RequestIssuer<'_>,
        client: &Client,
        session: &Session,
    ) -> OpResult<TokenResponse> {
        let access = tokens.issue(session, TokenKind::Access, None).await?;
        let mut response = TokenResponse::new(&access);

        if session.grant.has_scope("openid") {
            response.id_token = Some(tokens.issue_id_token(session).await?.value);
        }
        if client.is_grant_type_allowed(GrantType::RefreshToken) {
            response.refresh_token = Some(
                tokens
                    .issue(session, TokenKind::Refresh, None)
                    .await?
                    .value,
            );
        }
        Ok(response)
    }

    async fn refresh(&self, client: &Client, request: TokenRequest) -> OpResult<TokenResponse> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| OpError::invalid_request("refresh_token is required"))?;

        let tokens = self.provider.issuer().for_request();
        let verified = tokens.verify_token(refresh_token).await?;

        if verified.record.kind != TokenKind::Refresh {
            return Err(OpError::invalid_grant("token is not a refresh token"));
        }
        if verified.record.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                owner = %verified.record.client_id,
                "Refresh token presented by another client"
            );
            return Err(OpError::invalid_grant(
                "refresh token was issued to another client",
            ));
        }

        let granted = split_scope(&verified.record.scope);
        let scopes = match request.scope.as_deref() {
            Some(requested) => {
                let requested = split_scope(requested);
                if let Some(extra) = requested.iter().find(|s| !granted.contains(s)) {
                    return Err(OpError::invalid_request(format!(
                        "scope '{extra}' exceeds the original grant"
                    )));
                }
                requested
            }
            None => granted.clone(),
        };

        let rotate = self.provider.issuer().config().rotate_refresh_tokens;
        if rotate
            && !self
                .provider
                .issuer()
                .consume_token(&verified.record.id)
                .await?
        {
            warn!(
                client_id = %client.client_id,
                jti = %verified.record.id,
                "Refresh token already used"
            );
            return Err(OpError::invalid_grant("refresh token was already used"));
        }

        let session = &verified.session;
        let access = tokens
            .issue_with_scope(session, TokenKind::Access, None, &scopes)
            .await?;
        let mut response = TokenResponse::new(&access);

        if scopes.iter().any(|s| s == "openid") {
            response.id_token = Some(
                tokens
                    .issue_with_scope(session, TokenKind::Id, None, &scopes)
                    .await?
                    .value,
            );
        }

        if rotate {
            let next = tokens
                .issue_with_scope(session, TokenKind::Refresh, None, &granted)
                .await?;
            response.refresh_token = Some(next.value);
        }

        info!(
            client_id = %client.client_id,
            session_id = %session.id,
            "Tokens refreshed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::{Engine, engine::general_purpose::STANDARD};

    use super::*;
    use crate::authn::{StaticBackend, UpstreamIdentity};
    use crate::config::ProviderConfig;
    use crate::flow::authorize::{AuthorizationFlow, AuthorizationOutcome, AuthorizationRequest};

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    async fn provider(config: ProviderConfig) -> Provider {
        let identity = UpstreamIdentity::new("u1")
            .with_attribute("name", "User One")
            .with_attribute("email", "u1@example.com");
        let provider = Provider::builder(config)
            .backend(Arc::new(StaticBackend::new(identity)))
            .build()
            .unwrap();
        let client = Client::confidential("c1", "secret", vec!["https://rp/cb".to_string()])
            .unwrap()
            .with_subject_type(crate::types::SubjectType::Public);
        provider.registry().register(client).await.unwrap();
        provider
    }

    async fn authorize(provider: &Provider, scope: &str) -> String {
        let mut flow = AuthorizationFlow::new(provider);
        let request = AuthorizationRequest {
            response_type: Some("code".to_string()),
            client_id: Some("c1".to_string()),
            redirect_uri: Some("https://rp/cb".to_string()),
            scope: Some(scope.to_string()),
            nonce: Some("n1".to_string()),
            ..Default::default()
        };
        match flow.run(request, Vec::new()).await.unwrap() {
            AuthorizationOutcome::Respond(response) => {
                response.param("code").unwrap().to_string()
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn code_request(code: &str) -> TokenRequest {
        TokenRequest {
            grant_type: Some("authorization_code".to_string()),
            code: Some(code.to_string()),
            redirect_uri: Some("https://rp/cb".to_string()),
            ..Default::default()
        }
    }

    fn decode_payload(token: &str) -> serde_json::Value {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let payload = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_code_exchange_id_token_claims() {
        let provider = provider(ProviderConfig::default()).await;
        let code = authorize(&provider, "openid profile").await;

        let mut flow = TokenFlow::new(&provider);
        let response = flow
            .run(code_request(&code), Some(&basic("c1", "secret")))
            .await
            .unwrap();
        assert_eq!(flow.state(), SingleShotState::ResponseBuilt);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.scope, "openid profile");
        assert!(response.refresh_token.is_some());

        let claims = decode_payload(&response.id_token.unwrap());
        assert_eq!(claims["sub"], "u1");
        assert_eq!(claims["aud"], "c1");
        assert_eq!(claims["nonce"], "n1");
        assert_eq!(claims["name"], "User One");
        assert!(claims.get("email").is_none());
    }

    #[tokio::test]
    async fn test_code_exchanged_once() {
        let provider = provider(ProviderConfig::default()).await;
        let code = authorize(&provider, "openid").await;
        let auth = basic("c1", "secret");

        let first = TokenFlow::new(&provider)
            .run(code_request(&code), Some(&auth))
            .await
            .unwrap();
        let second = TokenFlow::new(&provider)
            .run(code_request(&code), Some(&auth))
            .await;
        assert!(matches!(second, Err(OpError::InvalidGrant { .. })));

        // replay revokes what the first exchange issued
        assert!(matches!(
            provider.issuer().verify(&first.access_token).await,
            Err(OpError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_unknown_client() {
        let provider = provider(ProviderConfig::default()).await;
        let mut flow = TokenFlow::new(&provider);
        let err = flow
            .run(code_request("whatever"), Some(&basic("nobody", "x")))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "unauthorized_client");
        assert_eq!(flow.state(), SingleShotState::Error);
    }

    #[tokio::test]
    async fn test_grant_type_errors() {
        let provider = provider(ProviderConfig::default()).await;
        let auth = basic("c1", "secret");

        let request = TokenRequest {
            grant_type: Some("password".to_string()),
            ..Default::default()
        };
        let err = TokenFlow::new(&provider)
            .run(request, Some(&auth))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");

        let err = TokenFlow::new(&provider)
            .run(TokenRequest::default(), Some(&auth))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match() {
        let provider = provider(ProviderConfig::default()).await;
        let code = authorize(&provider, "openid").await;
        let mut request = code_request(&code);
        request.redirect_uri = Some("https://rp/other".to_string());
        let err = TokenFlow::new(&provider)
            .run(request, Some(&basic("c1", "secret")))
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_narrows() {
        let provider = provider(ProviderConfig::default()).await;
        let code = authorize(&provider, "openid profile email").await;
        let auth = basic("c1", "secret");
        let issued = TokenFlow::new(&provider)
            .run(code_request(&code), Some(&auth))
            .await
            .unwrap();
        let old_refresh = issued.refresh_token.unwrap();

        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: Some(old_refresh.clone()),
            scope: Some("openid email".to_string()),
            ..Default::default()
        };
        let refreshed = TokenFlow::new(&provider)
            .run(request.clone(), Some(&auth))
            .await
            .unwrap();
        assert_eq!(refreshed.scope, "openid email");
        let claims = decode_payload(refreshed.id_token.as_deref().unwrap());
        assert_eq!(claims["email"], "u1@example.com");
        assert!(claims.get("name").is_none());

        // the new refresh token keeps the full grant
        let next = refreshed.refresh_token.unwrap();
        assert_eq!(
            decode_payload(&next)["scope"],
            "openid profile email"
        );

        // the old one was rotated out
        let err = TokenFlow::new(&provider)
            .run(request, Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_spends_token_once() {
        let provider = provider(ProviderConfig::default()).await;
        let code = authorize(&provider, "openid").await;
        let auth = basic("c1", "secret");
        let issued = TokenFlow::new(&provider)
            .run(code_request(&code), Some(&auth))
            .await
            .unwrap();

        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: issued.refresh_token,
            ..Default::default()
        };
        let mut first = TokenFlow::new(&provider);
        let mut second = TokenFlow::new(&provider);
        let (a, b) = tokio::join!(
            first.run(request.clone(), Some(&auth)),
            second.run(request, Some(&auth)),
        );
        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one refresh may succeed"
        );
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(
            err,
            OpError::InvalidGrant { .. } | OpError::TokenRevoked
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation() {
        let mut config = ProviderConfig::default();
        config.tokens.rotate_refresh_tokens = false;
        let provider = provider(config).await;
        let code = authorize(&provider, "openid").await;
        let auth = basic("c1", "secret");
        let issued = TokenFlow::new(&provider)
            .run(code_request(&code), Some(&auth))
            .await
            .unwrap();

        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: issued.refresh_token,
            ..Default::default()
        };
        let refreshed = TokenFlow::new(&provider)
            .run(request.clone(), Some(&auth))
            .await
            .unwrap();
        assert!(refreshed.refresh_token.is_none());
        assert!(TokenFlow::new(&provider).run(request, Some(&auth)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_wider_scope_and_access_tokens() {
        let provider = provider(ProviderConfig::default()).await;
        let code = authorize(&provider, "openid").await;
        let auth = basic("c1", "secret");
        let issued = TokenFlow::new(&provider)
            .run(code_request(&code), Some(&auth))
            .await
            .unwrap();

        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: issued.refresh_token.clone(),
            scope: Some("openid email".to_string()),
            ..Default::default()
        };
        let err = TokenFlow::new(&provider)
            .run(request, Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::InvalidRequest { .. }));

        let request = TokenRequest {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: Some(issued.access_token),
            ..Default::default()
        };
        let err = TokenFlow::new(&provider)
            .run(request, Some(&auth))
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::InvalidGrant { .. }));
    }
}
