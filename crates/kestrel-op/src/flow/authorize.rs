//! Authorization endpoint flow.
//!
//! Implements the authorization code flow of OpenID Connect Core 3.1:
//!
//! ```text
//! Received -> ClientValidated -> AuthenticationPending -> SessionCreated -> ResponseBuilt
//!     \              \                    \                     \
//!      +--------------+--------------------+---------------------+--> Error
//! ```
//!
//! Errors found before the redirect URI is validated are returned to the
//! caller directly. Once the redirect URI is trusted, errors are sent back
//! to the client through it, in the requested response mode.
//!
//! When the authentication backend needs an interactive login the validated
//! request is parked in the [`PendingStore`](crate::storage::PendingStore)
//! under a ticket and resumed with [`AuthorizationFlow::resume`].

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use super::pkce::PkceChallenge;
use super::split_scope;
use crate::OpResult;
use crate::authn::{AuthenticationContext, AuthenticationOutcome, UpstreamIdentity};
use crate::config::to_time_duration;
use crate::error::OpError;
use crate::provider::Provider;
use crate::types::{AuthorizationCode, Client, TokenEndpointAuthMethod};

/// Authorization request parameters (query string or form body).
///
/// Every field is optional here so that missing parameters are reported
/// as `invalid_request` rather than as a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationRequest {
    /// Must be `code`.
    pub response_type: Option<String>,
    /// Client identifier.
    pub client_id: Option<String>,
    /// Redirect URI, matched exactly against the registration.
    pub redirect_uri: Option<String>,
    /// Space-delimited scopes, must contain `openid`.
    pub scope: Option<String>,
    /// Opaque value echoed back to the client.
    pub state: Option<String>,
    /// Value copied into the ID token.
    pub nonce: Option<String>,
    /// `query`, `fragment` or `form_post`.
    pub response_mode: Option<String>,
    /// PKCE code challenge.
    pub code_challenge: Option<String>,
    /// PKCE method, only `S256` is accepted.
    pub code_challenge_method: Option<String>,
}

/// States of the authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// Request received, nothing checked yet.
    Received,
    /// Client and redirect URI validated.
    ClientValidated,
    /// Waiting for the authentication backend.
    AuthenticationPending,
    /// Session committed.
    SessionCreated,
    /// Response ready. Terminal.
    ResponseBuilt,
    /// Request failed. Terminal.
    Error,
}

impl AuthorizationState {
    /// Returns the state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ClientValidated => "client_validated",
            Self::AuthenticationPending => "authentication_pending",
            Self::SessionCreated => "session_created",
            Self::ResponseBuilt => "response_built",
            Self::Error => "error",
        }
    }

    /// Returns `true` for `ResponseBuilt` and `Error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResponseBuilt | Self::Error)
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the response parameters are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Query string of the redirect URI.
    #[default]
    Query,
    /// Fragment of the redirect URI.
    Fragment,
    /// Auto-submitting HTML form posted to the redirect URI.
    FormPost,
}

impl ResponseMode {
    /// Parses a `response_mode` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "fragment" => Some(Self::Fragment),
            "form_post" => Some(Self::FormPost),
            _ => None,
        }
    }

    /// Returns the parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
        }
    }
}

/// An authorization request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    /// The requesting client.
    pub client: Client,
    /// The validated redirect URI.
    pub redirect_uri: String,
    /// Scopes to grant, `openid` first-class among them.
    pub scopes: Vec<String>,
    /// Echoed `state`.
    pub state: Option<String>,
    /// Nonce for the ID token.
    pub nonce: Option<String>,
    /// Response placement.
    pub response_mode: ResponseMode,
    /// PKCE challenge bound to the code.
    pub code_challenge: Option<PkceChallenge>,
}

/// A validated request parked while the user logs in.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Ticket the request is resumed with.
    pub ticket: String,
    /// The request.
    pub authorization: ValidatedAuthorization,
    /// When the ticket stops being accepted.
    pub expires_at: OffsetDateTime,
}

impl PendingAuthorization {
    /// Returns `true` once the ticket can no longer be resumed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }
}

/// Parameters returned to the client through its redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    /// Target redirect URI.
    pub redirect_uri: String,
    /// Placement of the parameters.
    pub response_mode: ResponseMode,
    /// Response parameters in order.
    pub params: Vec<(String, String)>,
}

impl AuthorizationResponse {
    /// A successful response carrying `code`.
    #[must_use]
    pub fn success(authorization: &ValidatedAuthorization, code: String) -> Self {
        let mut params = vec![("code".to_string(), code)];
        if let Some(state) = &authorization.state {
            params.push(("state".to_string(), state.clone()));
        }
        Self {
            redirect_uri: authorization.redirect_uri.clone(),
            response_mode: authorization.response_mode,
            params,
        }
    }

    /// An error response for a request whose redirect URI is trusted.
    #[must_use]
    pub fn error(
        redirect_uri: impl Into<String>,
        response_mode: ResponseMode,
        state: Option<&str>,
        err: &OpError,
    ) -> Self {
        let mut params = vec![
            ("error".to_string(), err.oauth_error_code().to_string()),
            ("error_description".to_string(), err.public_description()),
        ];
        if let Some(state) = state {
            params.push(("state".to_string(), state.to_string()));
        }
        Self {
            redirect_uri: redirect_uri.into(),
            response_mode,
            params,
        }
    }

    /// Returns the value of a response parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if this is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.param("error").is_some()
    }

    /// Builds the redirect location for `query` and `fragment` modes.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI is not a valid URL.
    pub fn to_redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.redirect_uri)?;
        match self.response_mode {
            ResponseMode::Fragment => {
                let fragment = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(self.params.iter())
                    .finish();
                url.set_fragment(Some(&fragment));
            }
            ResponseMode::Query | ResponseMode::FormPost => {
                url.query_pairs_mut().extend_pairs(self.params.iter());
            }
        }
        Ok(url.to_string())
    }

    /// Renders the auto-submitting form for `form_post` mode.
    #[must_use]
    pub fn to_form_post_html(&self) -> String {
        let inputs: String = self
            .params
            .iter()
            .map(|(name, value)| {
                format!(
                    "<input type=\"hidden\" name=\"{}\" value=\"{}\"/>",
                    escape_html(name),
                    escape_html(value)
                )
            })
            .collect();
        format!(
            "<!DOCTYPE html><html><head><title>Submit This Form</title></head>\
             <body onload=\"javascript:document.forms[0].submit()\">\
             <form method=\"post\" action=\"{}\">{}\
             <noscript><button type=\"submit\">Continue</button></noscript>\
             </form></body></html>",
            escape_html(&self.redirect_uri),
            inputs
        )
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Result of running the authorization flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// Respond to the client through its redirect URI. May carry an error.
    Respond(AuthorizationResponse),

    /// Send the user agent to the backend's login page. The request is
    /// parked under `ticket`.
    LoginRequired {
        /// Login page URL.
        location: String,
        /// Ticket to resume with.
        ticket: String,
    },
}

/// Where errors go once the redirect URI is trusted.
struct ErrorTarget {
    redirect_uri: String,
    response_mode: ResponseMode,
    state: Option<String>,
}

impl ErrorTarget {
    fn of(authorization: &ValidatedAuthorization) -> Self {
        Self {
            redirect_uri: authorization.redirect_uri.clone(),
            response_mode: authorization.response_mode,
            state: authorization.state.clone(),
        }
    }

    fn respond(&self, err: &OpError) -> AuthorizationOutcome {
        AuthorizationOutcome::Respond(AuthorizationResponse::error(
            self.redirect_uri.clone(),
            self.response_mode,
            self.state.as_deref(),
            err,
        ))
    }
}

/// One authorization request in flight.
pub struct AuthorizationFlow<'a> {
    provider: &'a Provider,
    state: AuthorizationState,
}

impl<'a> AuthorizationFlow<'a> {
    /// Starts a flow in the `Received` state.
    #[must_use]
    pub fn new(provider: &'a Provider) -> Self {
        Self {
            provider,
            state: AuthorizationState::Received,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AuthorizationState {
        self.state
    }

    fn transition(&mut self, next: AuthorizationState) {
        debug!(from = %self.state, to = %next, "Authorization state change");
        self.state = next;
    }

    /// Runs a fresh authorization request.
    ///
    /// `headers` are the request headers, passed on to the authentication
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures found before the redirect URI is
    /// validated. Later failures come back as an error
    /// [`AuthorizationResponse`].
    pub async fn run(
        &mut self,
        request: AuthorizationRequest,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> OpResult<AuthorizationOutcome> {
        let (client, redirect_uri) = match self.validate_client(&request).await {
            Ok(validated) => validated,
            Err(e) => {
                self.transition(AuthorizationState::Error);
                return Err(e);
            }
        };
        self.transition(AuthorizationState::ClientValidated);

        let target = ErrorTarget {
            redirect_uri: redirect_uri.clone(),
            response_mode: request
                .response_mode
                .as_deref()
                .and_then(ResponseMode::parse)
                .unwrap_or_default(),
            state: request.state.clone(),
        };

        let authorization = match self.validate_parameters(client, redirect_uri, request) {
            Ok(authorization) => authorization,
            Err(e) => return Ok(self.fail(&target, e)),
        };

        let ticket = AuthorizationCode::generate_code();
        Ok(self.authenticate(authorization, ticket, headers).await)
    }

    /// Resumes a parked request after the user logged in.
    ///
    /// The backend is asked again with the same ticket and the new request
    /// headers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an unknown or expired ticket and
    /// `UnknownClient` if the client was removed in the meantime.
    pub async fn resume(
        &mut self,
        ticket: &str,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> OpResult<AuthorizationOutcome> {
        let authorization = self.take_pending(ticket).await?;
        Ok(self
            .authenticate(authorization, ticket.to_string(), headers)
            .await)
    }

    /// Resumes a parked request with an identity established out of band.
    ///
    /// # Errors
    ///
    /// As [`resume`](Self::resume).
    pub async fn resume_with_identity(
        &mut self,
        ticket: &str,
        identity: UpstreamIdentity,
    ) -> OpResult<AuthorizationOutcome> {
        let authorization = self.take_pending(ticket).await?;
        self.transition(AuthorizationState::AuthenticationPending);
        Ok(self.complete(authorization, identity).await)
    }

    async fn take_pending(&mut self, ticket: &str) -> OpResult<ValidatedAuthorization> {
        let pending = match self.provider.pending().take(ticket).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                self.transition(AuthorizationState::Error);
                return Err(OpError::invalid_request(
                    "unknown or expired authorization ticket",
                ));
            }
            Err(e) => {
                self.transition(AuthorizationState::Error);
                return Err(e);
            }
        };

        let mut authorization = pending.authorization;
        match self
            .provider
            .registry()
            .resolve(&authorization.client.client_id)
            .await
        {
            Ok(client) => authorization.client = client,
            Err(e) => {
                self.transition(AuthorizationState::Error);
                return Err(e);
            }
        }
        self.state = AuthorizationState::ClientValidated;
        Ok(authorization)
    }

    async fn validate_client(&self, request: &AuthorizationRequest) -> OpResult<(Client, String)> {
        let client_id = request
            .client_id
            .as_deref()
            .ok_or_else(|| OpError::invalid_request("client_id is required"))?;
        debug!(client_id = %client_id, "Authorization request received");

        let client = self.provider.registry().resolve(client_id).await?;

        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OpError::invalid_request("redirect_uri is required"))?;
        self.provider
            .registry()
            .validate_redirect(&client, redirect_uri)?;

        Ok((client, redirect_uri.to_string()))
    }

    fn validate_parameters(
        &self,
        client: Client,
        redirect_uri: String,
        request: AuthorizationRequest,
    ) -> OpResult<ValidatedAuthorization> {
        let capabilities = &self.provider.config().capabilities;

        let response_mode = match request.response_mode.as_deref() {
            None => ResponseMode::Query,
            Some(value) => ResponseMode::parse(value)
                .filter(|mode| {
                    capabilities
                        .response_modes_supported
                        .iter()
                        .any(|m| m == mode.as_str())
                })
                .ok_or_else(|| {
                    OpError::invalid_request(format!("unsupported response_mode '{value}'"))
                })?,
        };

        match request.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(OpError::unsupported_response_type(other)),
            None => return Err(OpError::invalid_request("response_type is required")),
        }

        let requested = split_scope(request.scope.as_deref().unwrap_or_default());
        if !requested.iter().any(|s| s == "openid") {
            return Err(OpError::invalid_request("scope must contain 'openid'"));
        }
        let mut scopes = Vec::with_capacity(requested.len());
        for scope in requested {
            if !capabilities.scopes_supported.contains(&scope) {
                debug!(client_id = %client.client_id, scope = %scope, "Dropping unknown scope");
                continue;
            }
            if !client.is_scope_allowed(&scope) {
                return Err(OpError::invalid_request(format!(
                    "scope '{scope}' is not allowed for this client"
                )));
            }
            scopes.push(scope);
        }

        let code_challenge = match request.code_challenge.as_deref() {
            Some(challenge) => Some(PkceChallenge::parse(
                challenge,
                request.code_challenge_method.as_deref(),
            )?),
            None if client.token_endpoint_auth_method == TokenEndpointAuthMethod::None => {
                return Err(OpError::invalid_request(
                    "code_challenge is required for public clients",
                ));
            }
            None => None,
        };

        Ok(ValidatedAuthorization {
            client,
            redirect_uri,
            scopes,
            state: request.state,
            nonce: request.nonce,
            response_mode,
            code_challenge,
        })
    }

    async fn authenticate(
        &mut self,
        authorization: ValidatedAuthorization,
        ticket: String,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> AuthorizationOutcome {
        self.transition(AuthorizationState::AuthenticationPending);
        let target = ErrorTarget::of(&authorization);

        let context = AuthenticationContext::new(
            authorization.client.clone(),
            authorization.scopes.clone(),
            headers,
            ticket.clone(),
        );

        match self.provider.backend().authenticate(&context).await {
            Ok(AuthenticationOutcome::Authenticated(identity)) => {
                self.complete(authorization, identity).await
            }
            Ok(AuthenticationOutcome::LoginRequired { location }) => {
                let lifetime = self
                    .provider
                    .config()
                    .sessions
                    .pending_authorization_lifetime;
                let pending = PendingAuthorization {
                    ticket: ticket.clone(),
                    authorization,
                    expires_at: OffsetDateTime::now_utc() + to_time_duration(lifetime),
                };
                match self.provider.pending().park(pending).await {
                    Ok(()) => {
                        debug!(
                            client_id = %context.client.client_id,
                            "Authorization parked for login"
                        );
                        AuthorizationOutcome::LoginRequired { location, ticket }
                    }
                    Err(e) => self.fail(&target, e),
                }
            }
            Ok(AuthenticationOutcome::Denied { reason }) => {
                warn!(
                    client_id = %context.client.client_id,
                    reason = %reason,
                    "Authentication backend denied the request"
                );
                self.fail(&target, OpError::access_denied(reason))
            }
            Err(e) => self.fail(&target, e),
        }
    }

    async fn complete(
        &mut self,
        authorization: ValidatedAuthorization,
        identity: UpstreamIdentity,
    ) -> AuthorizationOutcome {
        let target = ErrorTarget::of(&authorization);
        let sessions = self.provider.sessions();

        let event = sessions.authn_event(&identity);
        let session = match sessions
            .create_with_attributes(
                &identity.subject_id,
                &authorization.client,
                event,
                authorization.scopes.clone(),
                identity.attributes,
                authorization.nonce.clone(),
            )
            .await
        {
            Ok(session) => session,
            Err(e) => return self.fail(&target, e),
        };
        self.transition(AuthorizationState::SessionCreated);

        let code = match self
            .provider
            .issuer()
            .mint_code(
                &session,
                &authorization.redirect_uri,
                authorization.code_challenge.as_ref(),
            )
            .await
        {
            Ok(code) => code,
            Err(e) => {
                if let Err(discard) = sessions.discard(session.id).await {
                    error!(session_id = %session.id, error = %discard, "Failed to discard session");
                }
                return self.fail(&target, e);
            }
        };

        info!(
            client_id = %authorization.client.client_id,
            session_id = %session.id,
            "Authorization code issued"
        );
        self.transition(AuthorizationState::ResponseBuilt);
        AuthorizationOutcome::Respond(AuthorizationResponse::success(&authorization, code))
    }

    fn fail(&mut self, target: &ErrorTarget, err: OpError) -> AuthorizationOutcome {
        if err.is_server_error() {
            error!(error = %err, category = %err.category(), "Authorization failed");
        } else {
            warn!(error = %err, "Authorization request rejected");
        }
        self.transition(AuthorizationState::Error);
        target.respond(&err)
    }
}
