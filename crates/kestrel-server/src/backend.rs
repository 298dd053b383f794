//! Authentication backend for deployments behind an authenticating proxy.
//!
//! The proxy puts the subject id in a request header. Requests without the
//! header are sent to the login page with the pending ticket and the URL to
//! resume at once the login is done.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kestrel_op::OpResult;
use kestrel_op::authn::{
    AuthenticationBackend, AuthenticationContext, AuthenticationOutcome, UpstreamIdentity,
};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::config::{BackendConfig, UserEntry};

/// Trusts a proxy-set header for the subject id.
#[derive(Debug, Clone)]
pub struct TrustedHeaderBackend {
    header: String,
    login_url: String,
    resume_url: String,
    allow_unknown_users: bool,
    authn_method: String,
    users: BTreeMap<String, UserEntry>,
}

impl TrustedHeaderBackend {
    pub fn new(
        config: &BackendConfig,
        users: BTreeMap<String, UserEntry>,
        resume_url: impl Into<String>,
    ) -> Self {
        Self {
            header: config.header.to_ascii_lowercase(),
            login_url: config.login_url.clone(),
            resume_url: resume_url.into(),
            allow_unknown_users: config.allow_unknown_users,
            authn_method: config.authn_method.clone(),
            users,
        }
    }

    /// Login page location for a parked request.
    pub fn login_location(&self, ticket: &str) -> String {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("ticket", ticket)
            .append_pair("resume", &self.resume_url)
            .finish();
        let separator = if self.login_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.login_url)
    }

    fn identity(&self, subject_id: &str) -> Option<UpstreamIdentity> {
        match self.users.get(subject_id) {
            Some(user) => Some(
                UpstreamIdentity::new(subject_id)
                    .with_method(user.authn_method.as_deref().unwrap_or(&self.authn_method))
                    .with_attributes(user.attributes.clone()),
            ),
            None if self.allow_unknown_users => {
                Some(UpstreamIdentity::new(subject_id).with_method(&self.authn_method))
            }
            None => None,
        }
    }
}

#[async_trait]
impl AuthenticationBackend for TrustedHeaderBackend {
    async fn authenticate(
        &self,
        context: &AuthenticationContext,
    ) -> OpResult<AuthenticationOutcome> {
        let subject_id = context
            .header(&self.header)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(subject_id) = subject_id else {
            debug!(client_id = %context.client.client_id, "No upstream user, login required");
            return Ok(AuthenticationOutcome::LoginRequired {
                location: self.login_location(&context.ticket),
            });
        };

        match self.identity(subject_id) {
            Some(identity) => Ok(AuthenticationOutcome::Authenticated(identity)),
            None => {
                warn!(
                    client_id = %context.client.client_id,
                    subject_id,
                    "Upstream user not in directory"
                );
                Ok(AuthenticationOutcome::Denied {
                    reason: "unknown user".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_op::types::Client;
    use serde_json::json;

    fn backend(allow_unknown_users: bool) -> TrustedHeaderBackend {
        let mut users = BTreeMap::new();
        let mut attributes = serde_json::Map::new();
        attributes.insert("name".to_string(), json!("User One"));
        users.insert(
            "u1".to_string(),
            UserEntry {
                authn_method: Some("pwd".to_string()),
                attributes,
            },
        );
        let config = BackendConfig {
            header: "X-Remote-User".to_string(),
            login_url: "https://login.example.com/?lang=en".to_string(),
            allow_unknown_users,
            ..Default::default()
        };
        TrustedHeaderBackend::new(&config, users, "http://localhost:8080/authorize/resume")
    }

    fn context(user: Option<&str>) -> AuthenticationContext {
        let client = Client::public("c1", vec!["https://rp/cb".to_string()]);
        let headers = user
            .map(|u| vec![("x-remote-user".to_string(), u.to_string())])
            .unwrap_or_default();
        AuthenticationContext::new(client, vec!["openid".to_string()], headers, "t-1")
    }

    #[tokio::test]
    async fn test_known_user() {
        let outcome = backend(false).authenticate(&context(Some("u1"))).await.unwrap();
        let AuthenticationOutcome::Authenticated(identity) = outcome else {
            panic!("expected authenticated, got {outcome:?}");
        };
        assert_eq!(identity.subject_id, "u1");
        assert_eq!(identity.authn_method, "pwd");
        assert_eq!(identity.attributes["name"], "User One");
    }

    #[tokio::test]
    async fn test_missing_header_requires_login() {
        let outcome = backend(false).authenticate(&context(None)).await.unwrap();
        assert_eq!(
            outcome,
            AuthenticationOutcome::LoginRequired {
                location: "https://login.example.com/?lang=en&ticket=t-1&resume=http%3A%2F%2Flocalhost%3A8080%2Fauthorize%2Fresume".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let outcome = backend(false).authenticate(&context(Some("u9"))).await.unwrap();
        assert!(matches!(outcome, AuthenticationOutcome::Denied { .. }));

        let outcome = backend(true).authenticate(&context(Some("u9"))).await.unwrap();
        let AuthenticationOutcome::Authenticated(identity) = outcome else {
            panic!("expected authenticated");
        };
        assert_eq!(identity.authn_method, "proxy");
        assert!(identity.attributes.is_empty());
    }
}
