//! Protocol flows.
//!
//! Each endpoint request is handled by one flow value that lives for the
//! duration of the request. The authorization flow moves through several
//! states and may be parked while the user logs in; the token, userinfo and
//! introspection flows are single-shot.
//!
//! The [`Endpoint`] dispatch table maps configured paths to flows.

pub mod authorize;
pub mod introspect;
pub mod pkce;
pub mod token;
pub mod userinfo;

use std::fmt;

use crate::config::EndpointConfig;

pub use authorize::{
    AuthorizationFlow, AuthorizationOutcome, AuthorizationRequest, AuthorizationResponse,
    AuthorizationState, PendingAuthorization, ResponseMode, ValidatedAuthorization,
};
pub use introspect::{IntrospectionFlow, IntrospectionRequest, IntrospectionResponse};
pub use pkce::{PkceChallenge, PkceError};
pub use token::{TokenFlow, TokenRequest, TokenResponse};
pub use userinfo::{UserinfoFlow, bearer_token};

/// Endpoints served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// OpenID Provider configuration document.
    Discovery,
    /// Public signing keys.
    Jwks,
    /// Authorization endpoint.
    Authorization,
    /// Token endpoint.
    Token,
    /// Userinfo endpoint.
    Userinfo,
    /// Token introspection endpoint.
    Introspection,
}

impl Endpoint {
    /// Every endpoint, in routing order.
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Discovery,
        Endpoint::Jwks,
        Endpoint::Authorization,
        Endpoint::Token,
        Endpoint::Userinfo,
        Endpoint::Introspection,
    ];

    /// The configured path of this endpoint.
    #[must_use]
    pub fn path(self, endpoints: &EndpointConfig) -> &str {
        match self {
            Self::Discovery => &endpoints.discovery,
            Self::Jwks => &endpoints.jwks,
            Self::Authorization => &endpoints.authorization,
            Self::Token => &endpoints.token,
            Self::Userinfo => &endpoints.userinfo,
            Self::Introspection => &endpoints.introspection,
        }
    }

    /// Looks up the endpoint configured at `path`.
    #[must_use]
    pub fn from_path(endpoints: &EndpointConfig, path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.path(endpoints) == path)
    }

    /// Returns the endpoint name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Jwks => "jwks",
            Self::Authorization => "authorization",
            Self::Token => "token",
            Self::Userinfo => "userinfo",
            Self::Introspection => "introspection",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// States of the single-shot flows (token, userinfo, introspection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleShotState {
    /// Request received, nothing checked yet.
    Received,
    /// Caller authenticated (client credentials or bearer token).
    Authorized,
    /// Response ready. Terminal.
    ResponseBuilt,
    /// Request failed. Terminal.
    Error,
}

impl SingleShotState {
    /// Returns `true` for `ResponseBuilt` and `Error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResponseBuilt | Self::Error)
    }
}

/// Splits a space-delimited scope parameter, keeping first occurrences.
pub(crate) fn split_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for scope in scope.split_whitespace() {
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_paths() {
        let mut endpoints = EndpointConfig::default();
        endpoints.token = "/oauth/token".to_string();

        assert_eq!(Endpoint::Token.path(&endpoints), "/oauth/token");
        assert_eq!(
            Endpoint::from_path(&endpoints, "/oauth/token"),
            Some(Endpoint::Token)
        );
        assert_eq!(Endpoint::from_path(&endpoints, "/token"), None);
        assert_eq!(
            Endpoint::from_path(&endpoints, "/.well-known/openid-configuration"),
            Some(Endpoint::Discovery)
        );
    }

    #[test]
    fn test_split_scope_dedupes() {
        assert_eq!(
            split_scope("openid  profile openid"),
            vec!["openid".to_string(), "profile".to_string()]
        );
        assert!(split_scope("   ").is_empty());
    }

    #[test]
    fn test_terminal_states() {
        assert!(SingleShotState::Error.is_terminal());
        assert!(!SingleShotState::Authorized.is_terminal());
    }
}
