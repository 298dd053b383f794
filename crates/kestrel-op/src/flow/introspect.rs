//! Token introspection flow (RFC 7662).
//!
//! Only the client a token was issued to may introspect it. Tokens that
//! fail verification, or belong to another client, are reported as
//! `{"active": false}` without further detail.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SingleShotState;
use crate::OpResult;
use crate::error::OpError;
use crate::provider::Provider;
use crate::registry::ClientCredentials;

/// Introspection request form parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IntrospectionRequest {
    /// The token to introspect.
    pub token: Option<String>,
    /// Ignored hint (`access_token` / `refresh_token`).
    pub token_type_hint: Option<String>,
    /// Client id (`client_secret_post` or public clients).
    pub client_id: Option<String>,
    /// Client secret (`client_secret_post`).
    pub client_secret: Option<String>,
}

/// Introspection response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently valid.
    pub active: bool,

    /// Space-delimited scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client the token was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Subject as released to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Token type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiry (Unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issue time (Unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Token id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    /// The response for any token that is not active.
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// One introspection request in flight.
pub struct IntrospectionFlow<'a> {
    provider: &'a Provider,
    state: SingleShotState,
}

impl<'a> IntrospectionFlow<'a> {
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

    /// Introspects a token on behalf of an authenticated client.
    ///
    /// # Errors
    ///
    /// Returns the client authentication errors of the registry,
    /// `InvalidRequest` when no token is given, and storage failures.
    /// Invalid tokens are not errors.
    pub async fn run(
        &mut self,
        request: IntrospectionRequest,
        authorization: Option<&str>,
    ) -> OpResult<IntrospectionResponse> {
        let result = self.process(request, authorization).await;
        self.state = match result {
            Ok(_) => SingleShotState::ResponseBuilt,
            Err(_) => SingleShotState::Error,
        };
        result
    }

    async fn process(
        &mut self,
        request: IntrospectionRequest,
        authorization: Option<&str>,
    ) -> OpResult<IntrospectionResponse> {
        let credentials = ClientCredentials::from_request(
            authorization,
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        );
        let client = self.provider.registry().authenticate(&credentials).await?;
        self.state = SingleShotState::Authorized;

        let token = request
            .token
            .as_deref()
            .ok_or_else(|| OpError::invalid_request("token is required"))?;

        let issuer = self.provider.issuer();
        let verified = match issuer.for_request().verify_token(token).await {
            Ok(verified) => verified,
            Err(e) if e.is_token_error() || e.requires_reauthentication() => {
                debug!(client_id = %client.client_id, error = %e, "Introspected token is inactive");
                return Ok(IntrospectionResponse::inactive());
            }
            Err(e) => return Err(e),
        };

        let record = verified.record;
        if record.client_id != client.client_id {
            debug!(
                client_id = %client.client_id,
                owner = %record.client_id,
                "Introspection of another client's token"
            );
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(record.scope),
            sub: Some(self.provider.claims().subject(&verified.session)),
            token_type: Some(record.kind.token_type().to_string()),
            exp: Some(record.expires_at.unix_timestamp()),
            iat: Some(record.issued_at.unix_timestamp()),
            iss: Some(issuer.issuer().to_string()),
            aud: Some(record.client_id.clone()),
            client_id: Some(record.client_id),
            jti: Some(record.id),
        })
    }
}
