//! Authentication backend seam.
//!
//! The provider never authenticates end users itself. While an authorization
//! request is in the `AuthenticationPending` state it asks an
//! [`AuthenticationBackend`] who the user is. The backend either answers
//! immediately or sends the user agent to an out-of-band login page; the
//! request is then parked under a ticket and resumed once the login is done.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::OpResult;
use crate::types::Client;

/// Request headers that are never handed to the backend.
const HIDDEN_HEADERS: &[&str] = &["cookie", "user-agent"];

/// An end user confirmed by the authentication backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamIdentity {
    /// Internal subject id.
    pub subject_id: String,

    /// When the user authenticated.
    #[serde(with = "time::serde::rfc3339")]
    pub authn_time: OffsetDateTime,

    /// Authentication method reference.
    pub authn_method: String,

    /// User attributes, the source data for claims.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl UpstreamIdentity {
    /// An identity authenticated now with the `unspecified` method and no
    /// attributes.
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            authn_time: OffsetDateTime::now_utc(),
            authn_method: "unspecified".to_string(),
            attributes: Map::new(),
        }
    }

    /// Sets the authentication method reference.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.authn_method = method.into();
        self
    }

    /// Sets the authentication time.
    #[must_use]
    pub fn with_authn_time(mut self, authn_time: OffsetDateTime) -> Self {
        self.authn_time = authn_time;
        self
    }

    /// Adds one attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Replaces all attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// What the backend sees of an authorization request.
#[derive(Debug, Clone)]
pub struct AuthenticationContext {
    /// The requesting client.
    pub client: Client,

    /// Scopes that will be granted.
    pub scopes: Vec<String>,

    /// Request headers, lower-cased names, without cookies or user agent.
    pub headers: BTreeMap<String, String>,

    /// Ticket the request is parked under if the backend asks for a login.
    pub ticket: String,
}

impl AuthenticationContext {
    /// Builds a context, dropping headers the backend must not see.
    #[must_use]
    pub fn new(
        client: Client,
        scopes: Vec<String>,
        headers: impl IntoIterator<Item = (String, String)>,
        ticket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            scopes,
            headers: filter_headers(headers),
            ticket: ticket.into(),
        }
    }

    /// Looks up a header by (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Name to show the user as the requester.
    #[must_use]
    pub fn requester_name(&self) -> &str {
        self.client.display_name()
    }
}

/// Lower-cases header names and drops the hidden ones.
#[must_use]
pub fn filter_headers(
    headers: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .filter(|(name, _)| !HIDDEN_HEADERS.contains(&name.as_str()))
        .collect()
}

/// The backend's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationOutcome {
    /// The user is known.
    Authenticated(UpstreamIdentity),

    /// The user agent must be sent to `location` to log in. The request
    /// resumes later with the context's ticket.
    LoginRequired {
        /// Login page URL.
        location: String,
    },

    /// The user may not use this client.
    Denied {
        /// Reason, returned to the client as `access_denied`.
        reason: String,
    },
}

/// Supplies the identity of the end user.
#[async_trait]
pub trait AuthenticationBackend: Send + Sync {
    /// Authenticates the user behind an authorization request.
    async fn authenticate(&self, context: &AuthenticationContext)
    -> OpResult<AuthenticationOutcome>;
}

/// A backend that authenticates every request as one fixed identity.
///
/// Useful for tests and demos.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    identity: UpstreamIdentity,
}

impl StaticBackend {
    /// Creates a backend answering with `identity`.
    #[must_use]
    pub fn new(identity: UpstreamIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl AuthenticationBackend for StaticBackend {
    async fn authenticate(
        &self,
        _context: &AuthenticationContext,
    ) -> OpResult<AuthenticationOutcome> {
        Ok(AuthenticationOutcome::Authenticated(self.identity.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_headers_dropped() {
        let headers = vec![
            ("Cookie".to_string(), "sid=1".to_string()),
            ("User-Agent".to_string(), "curl".to_string()),
            ("X-Remote-User".to_string(), "u1".to_string()),
        ];
        let filtered = filter_headers(headers);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["x-remote-user"], "u1");
    }

    #[test]
    fn test_context_header_lookup() {
        let client = Client::public("c1", vec!["https://rp/cb".to_string()]).with_name("RP");
        let context = AuthenticationContext::new(
            client,
            vec!["openid".to_string()],
            vec![("X-Remote-User".to_string(), "u1".to_string())],
            "ticket",
        );
        assert_eq!(context.header("x-remote-user"), Some("u1"));
        assert_eq!(context.header("X-REMOTE-USER"), Some("u1"));
        assert_eq!(context.requester_name(), "RP");
    }

    #[test]
    fn test_identity_builder() {
        let identity = UpstreamIdentity::new("u1")
            .with_method("pwd")
            .with_attribute("email", "u1@example.com");
        assert_eq!(identity.authn_method, "pwd");
        assert_eq!(identity.attributes["email"], "u1@example.com");
    }

    #[tokio::test]
    async fn test_static_backend() {
        let backend = StaticBackend::new(UpstreamIdentity::new("u1"));
        let context = AuthenticationContext::new(
            Client::public("c1", vec!["https://rp/cb".to_string()]),
            vec![],
            Vec::new(),
            "t",
        );
        let outcome = backend.authenticate(&context).await.unwrap();
        assert!(matches!(outcome, AuthenticationOutcome::Authenticated(i) if i.subject_id == "u1"));
    }
}
