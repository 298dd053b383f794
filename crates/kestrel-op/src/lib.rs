//! # kestrel-op
//!
//! Embeddable OpenID Connect Provider core.
//!
//! This crate provides:
//! - Authorization code flow with PKCE, state and nonce handling
//! - ID, access and refresh tokens signed with rotating keys
//! - Session lifecycle with revocation that reaches every issued token
//! - Scope based claim release with public and pairwise subjects
//! - Axum handlers for discovery, JWKS, authorize, token, userinfo and
//!   introspection
//!
//! ## Overview
//!
//! The provider does not authenticate end users itself. An
//! [`AuthenticationBackend`](authn::AuthenticationBackend) supplies the
//! identity, and the provider turns it into sessions and tokens.
//!
//! ## Modules
//!
//! - [`config`] - Provider configuration
//! - [`registry`] - Client Registry
//! - [`session`] - Session Manager
//! - [`token`] - Token Issuer, signing keys and JWT handling
//! - [`claims`] - Claims Resolver
//! - [`flow`] - Protocol flows and the endpoint dispatch table
//! - [`provider`] - Assembly of the components
//! - [`http`] - Axum router and handlers
//! - [`storage`] - Storage traits and in-memory stores
//! - [`authn`] - Authentication backend seam

pub mod authn;
pub mod claims;
pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod provider;
pub mod registry;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

pub use authn::{
    AuthenticationBackend, AuthenticationContext, AuthenticationOutcome, StaticBackend,
    UpstreamIdentity,
};
pub use claims::ClaimsResolver;
pub use config::{ConfigError, ProviderConfig};
pub use error::{ErrorCategory, OpError};
pub use flow::Endpoint;
pub use http::{ProviderState, router};
pub use provider::{DiscoveryDocument, Provider, ProviderBuilder};
pub use registry::{ClientCredentials, ClientRegistry};
pub use session::SessionManager;
pub use token::{KeyRing, SigningAlgorithm, SigningKeyPair, TokenIssuer};
pub use types::{Client, ClientValidationError, GrantType, Session, SubjectType, TokenKind};

/// Type alias for provider results.
pub type OpResult<T> = Result<T, OpError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use kestrel_op::prelude::*;
/// ```
pub mod prelude {
    pub use crate::OpResult;
    pub use crate::authn::{
        AuthenticationBackend, AuthenticationContext, AuthenticationOutcome, UpstreamIdentity,
    };
    pub use crate::config::ProviderConfig;
    pub use crate::error::{ErrorCategory, OpError};
    pub use crate::flow::{
        AuthorizationFlow, AuthorizationOutcome, Endpoint, IntrospectionFlow, TokenFlow,
        UserinfoFlow,
    };
    pub use crate::http::{ProviderState, router};
    pub use crate::provider::{Provider, ProviderBuilder};
    pub use crate::types::{Client, GrantType, Session, SubjectType, TokenEndpointAuthMethod};
}
