//! Provider assembly.
//!
//! A [`Provider`] owns one instance of every component: the client
//! registry, session manager, token issuer, claims resolver and the
//! authentication backend. It is built once at startup with
//! [`ProviderBuilder`] and shared (behind an `Arc`) by all requests.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::OpResult;
use crate::authn::AuthenticationBackend;
use crate::claims::ClaimsResolver;
use crate::config::{ProviderConfig, SigningConfig, to_time_duration};
use crate::error::OpError;
use crate::flow::Endpoint;
use crate::registry::ClientRegistry;
use crate::session::SessionManager;
use crate::storage::{
    ClientStore, CodeStore, MemoryClientStore, MemoryCodeStore, MemoryPendingStore,
    MemorySessionStore, MemoryTokenStore, PendingStore, SessionStore, TokenStore,
};
use crate::token::{Jwks, KeyRing, SigningAlgorithm, SigningKeyPair, TokenIssuer};
use crate::types::{AuthnEvent, GrantType, TokenEndpointAuthMethod};

/// Length in bytes of a generated pairwise salt.
const GENERATED_SALT_SIZE: usize = 32;

/// OpenID Provider Metadata (OpenID Connect Discovery 1.0, Section 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub introspection_endpoint: String,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub introspection_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

/// The assembled provider.
pub struct Provider {
    config: ProviderConfig,
    registry: ClientRegistry,
    sessions: SessionManager,
    issuer: TokenIssuer,
    claims: Arc<ClaimsResolver>,
    backend: Arc<dyn AuthenticationBackend>,
    pending: Arc<dyn PendingStore>,
}

impl Provider {
    /// Starts building a provider from `config`.
    #[must_use]
    pub fn builder(config: ProviderConfig) -> ProviderBuilder {
        ProviderBuilder::new(config)
    }

    /// The configuration the provider was built with.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Client registry.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Session manager.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Token issuer.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Claims resolver.
    #[must_use]
    pub fn claims(&self) -> &ClaimsResolver {
        &self.claims
    }

    /// Authentication backend.
    #[must_use]
    pub fn backend(&self) -> &dyn AuthenticationBackend {
        self.backend.as_ref()
    }

    /// Store of parked authorization requests.
    #[must_use]
    pub fn pending(&self) -> &dyn PendingStore {
        self.pending.as_ref()
    }

    /// Absolute URL of an endpoint.
    #[must_use]
    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        self.config
            .endpoint_url(endpoint.path(&self.config.endpoints))
    }

    /// Public signing keys.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.issuer.jwks()
    }

    /// Builds the discovery document from the configured paths and
    /// capabilities.
    #[must_use]
    pub fn discovery_document(&self) -> DiscoveryDocument {
        let capabilities = &self.config.capabilities;
        let auth_methods: Vec<String> = [
            TokenEndpointAuthMethod::ClientSecretBasic,
            TokenEndpointAuthMethod::ClientSecretPost,
            TokenEndpointAuthMethod::None,
        ]
        .iter()
        .map(|m| m.as_str().to_string())
        .collect();

        DiscoveryDocument {
            issuer: self.config.issuer.clone(),
            authorization_endpoint: self.endpoint_url(Endpoint::Authorization),
            token_endpoint: self.endpoint_url(Endpoint::Token),
            userinfo_endpoint: self.endpoint_url(Endpoint::Userinfo),
            jwks_uri: self.endpoint_url(Endpoint::Jwks),
            introspection_endpoint: self.endpoint_url(Endpoint::Introspection),
            scopes_supported: capabilities.scopes_supported.clone(),
            claims_supported: capabilities.claims_supported.clone(),
            response_types_supported: vec!["code".to_string()],
            response_modes_supported: capabilities.response_modes_supported.clone(),
            grant_types_supported: [GrantType::AuthorizationCode, GrantType::RefreshToken]
                .iter()
                .map(|g| g.as_str().to_string())
                .collect(),
            subject_types_supported: capabilities.subject_types_supported.clone(),
            id_token_signing_alg_values_supported: vec![self.config.signing.algorithm.clone()],
            token_endpoint_auth_methods_supported: auth_methods.clone(),
            introspection_endpoint_auth_methods_supported: auth_methods,
            code_challenge_methods_supported: vec!["S256".to_string()],
        }
    }
}

/// Builds a [`Provider`].
///
/// Stores default to the in-memory implementations. The authentication
/// backend has no default.
pub struct ProviderBuilder {
    config: ProviderConfig,
    signing_key: Option<SigningKeyPair>,
    backend: Option<Arc<dyn AuthenticationBackend>>,
    clients: Option<Arc<dyn ClientStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    tokens: Option<Arc<dyn TokenStore>>,
    codes: Option<Arc<dyn CodeStore>>,
    pending: Option<Arc<dyn PendingStore>>,
}

impl ProviderBuilder {
    fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            signing_key: None,
            backend: None,
            clients: None,
            sessions: None,
            tokens: None,
            codes: None,
            pending: None,
        }
    }

    /// Sets the authentication backend.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn AuthenticationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses `key` instead of loading or generating one.
    #[must_use]
    pub fn signing_key(mut self, key: SigningKeyPair) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Uses a custom client store.
    #[must_use]
    pub fn client_store(mut self, store: Arc<dyn ClientStore>) -> Self {
        self.clients = Some(store);
        self
    }

    /// Uses a custom session store.
    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Uses a custom token store.
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(store);
        self
    }

    /// Uses a custom authorization code store.
    #[must_use]
    pub fn code_store(mut self, store: Arc<dyn CodeStore>) -> Self {
        self.codes = Some(store);
        self
    }

    /// Uses a custom pending authorization store.
    #[must_use]
    pub fn pending_store(mut self, store: Arc<dyn PendingStore>) -> Self {
        self.pending = Some(store);
        self
    }

    /// Validates the configuration and assembles the provider.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid configuration, a missing
    /// backend, or a signing key that cannot be loaded.
    pub fn build(self) -> OpResult<Provider> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| OpError::configuration(e.to_string()))?;

        let backend = self
            .backend
            .ok_or_else(|| OpError::configuration("an authentication backend is required"))?;

        let signing_key = match self.signing_key {
            Some(key) => key,
            None => load_signing_key(&config.signing)?,
        };
        info!(
            kid = %signing_key.kid,
            algorithm = %signing_key.algorithm,
            "Signing key ready"
        );

        let pairwise_salt = match &config.sessions.pairwise_salt {
            Some(salt) => salt.clone(),
            None => {
                warn!("No pairwise salt configured, pairwise subjects change on restart");
                AuthnEvent::generate_salt(GENERATED_SALT_SIZE)
            }
        };

        let clients = self
            .clients
            .unwrap_or_else(|| Arc::new(MemoryClientStore::new()));
        let session_store = self
            .sessions
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new(config.sessions.max_sessions)));
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let codes = self
            .codes
            .unwrap_or_else(|| Arc::new(MemoryCodeStore::new()));
        let pending = self
            .pending
            .unwrap_or_else(|| Arc::new(MemoryPendingStore::new()));

        let claims = Arc::new(ClaimsResolver::new(
            config.scope_claims.clone(),
            config.capabilities.claims_supported.clone(),
            pairwise_salt,
        ));
        let sessions = SessionManager::new(
            session_store,
            tokens.clone(),
            to_time_duration(config.sessions.lifetime),
            config.sessions.salt_size,
        );
        let keys = Arc::new(KeyRing::new(signing_key, config.signing.keys_to_keep));
        let issuer = TokenIssuer::new(
            config.issuer.clone(),
            keys,
            sessions.clone(),
            tokens,
            codes,
            claims.clone(),
            config.tokens.clone(),
        );

        info!(issuer = %config.issuer, "Provider assembled");
        Ok(Provider {
            registry: ClientRegistry::new(clients),
            sessions,
            issuer,
            claims,
            backend,
            pending,
            config,
        })
    }
}

/// Loads the configured PEM key pair, or generates a key when none is set.
///
/// # Errors
///
/// Returns `Configuration` if the files cannot be read or parsed.
pub fn load_signing_key(signing: &SigningConfig) -> OpResult<SigningKeyPair> {
    let algorithm: SigningAlgorithm = signing
        .algorithm
        .parse()
        .map_err(|e: crate::token::JwtError| OpError::configuration(e.to_string()))?;

    let mut key = match (&signing.private_key_path, &signing.public_key_path) {
        (Some(private_path), Some(public_path)) => {
            let private_pem = read_pem(private_path)?;
            let public_pem = read_pem(public_path)?;
            let kid = signing
                .key_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            SigningKeyPair::from_pem(kid, algorithm, &private_pem, &public_pem)?
        }
        _ => {
            warn!(
                algorithm = %algorithm,
                "No signing key configured, generating an ephemeral key"
            );
            SigningKeyPair::generate(algorithm)?
        }
    };
    if let Some(kid) = &signing.key_id {
        key.kid = kid.clone();
    }
    Ok(key)
}

fn read_pem(path: &Path) -> OpResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        OpError::configuration(format!("failed to read key file {}: {e}", path.display()))
    })
}
