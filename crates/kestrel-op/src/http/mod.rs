//! Axum HTTP surface of the provider.
//!
//! [`router`] walks the [`Endpoint`] dispatch table and mounts one handler
//! per configured path. Discovery and JWKS are readable cross-origin.
//!
//! # Available Handlers
//!
//! - [`discovery`] - OpenID Provider configuration and JWKS
//! - [`authorize`] - Authorization endpoint and login resume
//! - [`token`] - Token endpoint
//! - [`userinfo`] - Userinfo endpoint
//! - [`introspect`] - Token introspection (RFC 7662)

pub mod authorize;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod introspect;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::flow::Endpoint;
use crate::provider::Provider;

pub use authorize::{authorize_get_handler, authorize_post_handler, resume_handler};
pub use discovery::{discovery_handler, jwks_handler};
pub use error::ErrorBody;
pub use extract::{OAuthForm, OAuthQuery};
pub use introspect::introspect_handler;
pub use token::token_handler;
pub use userinfo::{userinfo_get_handler, userinfo_post_handler};

/// Shared state of every handler.
#[derive(Clone)]
pub struct ProviderState {
    /// The assembled provider.
    pub provider: Arc<Provider>,
}

impl ProviderState {
    /// Creates the handler state.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

/// Path of the login resume endpoint, below the authorization endpoint.
#[must_use]
pub fn resume_path(authorization_path: &str) -> String {
    format!("{}/resume", authorization_path.trim_end_matches('/'))
}

/// Builds the router for all configured endpoints.
pub fn router(state: ProviderState) -> Router {
    let endpoints = state.provider.config().endpoints.clone();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let mut router = Router::new();
    for endpoint in Endpoint::ALL {
        let path = endpoint.path(&endpoints);
        router = match endpoint {
            Endpoint::Discovery => {
                router.route(path, get(discovery_handler).layer(cors.clone()))
            }
            Endpoint::Jwks => router.route(path, get(jwks_handler).layer(cors.clone())),
            Endpoint::Authorization => router
                .route(path, get(authorize_get_handler).post(authorize_post_handler))
                .route(&resume_path(path), get(resume_handler)),
            Endpoint::Token => router.route(path, post(token_handler)),
            Endpoint::Userinfo => {
                router.route(path, get(userinfo_get_handler).post(userinfo_post_handler))
            }
            Endpoint::Introspection => router.route(path, post(introspect_handler)),
        };
    }

    router.with_state(state)
}

/// Request headers as owned name/value pairs, skipping non-UTF-8 values.
pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

pub(crate) fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}
