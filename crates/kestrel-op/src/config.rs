//! Provider configuration.
//!
//! All sections use `#[serde(default)]` so a configuration file only has to
//! name the values it changes. Durations are written in humantime notation
//! (`"10m"`, `"30d"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! [provider]
//! issuer = "https://op.example.com"
//!
//! [provider.tokens]
//! id_token_lifetime = "5m"
//! refresh_token_lifetime = "14d"
//!
//! [provider.sessions]
//! max_sessions = 50000
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::jwt::SigningAlgorithm;

/// Root provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Issuer identifier (`iss` claim and discovery `issuer`).
    /// Must be the public base URL of the provider.
    pub issuer: String,

    /// Endpoint paths served by the router.
    pub endpoints: EndpointConfig,

    /// Token lifetimes and refresh behaviour.
    pub tokens: TokenConfig,

    /// Signing key configuration.
    pub signing: SigningConfig,

    /// Session store configuration.
    pub sessions: SessionConfig,

    /// Advertised and enforced capabilities.
    pub capabilities: CapabilitiesConfig,

    /// Scope to claim mapping used by the claims resolver.
    pub scope_claims: BTreeMap<String, Vec<String>>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            endpoints: EndpointConfig::default(),
            tokens: TokenConfig::default(),
            signing: SigningConfig::default(),
            sessions: SessionConfig::default(),
            capabilities: CapabilitiesConfig::default(),
            scope_claims: default_scope_claims(),
        }
    }
}

/// Standard OpenID Connect scope to claim mapping (OIDC Core 5.4).
fn default_scope_claims() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 5] = [
        ("openid", &["sub"]),
        (
            "profile",
            &[
                "name",
                "family_name",
                "given_name",
                "middle_name",
                "nickname",
                "preferred_username",
                "profile",
                "picture",
                "website",
                "gender",
                "birthdate",
                "zoneinfo",
                "locale",
                "updated_at",
            ],
        ),
        ("email", &["email", "email_verified"]),
        ("address", &["address"]),
        ("phone", &["phone_number", "phone_number_verified"]),
    ];

    entries
        .into_iter()
        .map(|(scope, claims)| {
            (
                scope.to_string(),
                claims.iter().map(|c| (*c).to_string()).collect(),
            )
        })
        .collect()
}

/// Endpoint paths.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Discovery document path.
    pub discovery: String,
    /// Public key set path.
    pub jwks: String,
    /// Authorization endpoint path.
    pub authorization: String,
    /// Token endpoint path.
    pub token: String,
    /// Userinfo endpoint path.
    pub userinfo: String,
    /// Token introspection endpoint path.
    pub introspection: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            discovery: "/.well-known/openid-configuration".to_string(),
            jwks: "/jwks".to_string(),
            authorization: "/authorize".to_string(),
            token: "/token".to_string(),
            userinfo: "/userinfo".to_string(),
            introspection: "/introspect".to_string(),
        }
    }
}

impl EndpointConfig {
    /// Returns all configured paths with their names.
    pub fn paths(&self) -> [(&'static str, &str); 6] {
        [
            ("discovery", self.discovery.as_str()),
            ("jwks", self.jwks.as_str()),
            ("authorization", self.authorization.as_str()),
            ("token", self.token.as_str()),
            ("userinfo", self.userinfo.as_str()),
            ("introspection", self.introspection.as_str()),
        ]
    }
}

/// Token lifetimes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// ID token lifetime. Kept short, ID tokens are consumed once by the client.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Revoke the presented refresh token and issue a new one on every refresh.
    pub rotate_refresh_tokens: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(600), // 10 minutes
            id_token_lifetime: Duration::from_secs(600),           // 10 minutes
            access_token_lifetime: Duration::from_secs(3600),      // 1 hour
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600), // 30 days
            rotate_refresh_tokens: true,
        }
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// PEM private key. A fresh key is generated at startup when unset.
    pub private_key_path: Option<PathBuf>,

    /// PEM public key matching `private_key_path`.
    pub public_key_path: Option<PathBuf>,

    /// Key id published in the JWKS. Random when unset.
    pub key_id: Option<String>,

    /// Number of previous keys kept for verification after a rotation.
    pub keys_to_keep: usize,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            private_key_path: None,
            public_key_path: None,
            key_id: None,
            keys_to_keep: 2,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an authenticated session stays usable.
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,

    /// How long a parked authorization request waits for the login to finish.
    #[serde(with = "humantime_serde")]
    pub pending_authorization_lifetime: Duration,

    /// Maximum number of live sessions held by the store.
    pub max_sessions: usize,

    /// Number of random bytes in the authentication event salt.
    pub salt_size: usize,

    /// Salt for pairwise subject identifiers.
    /// When unset a random salt is generated at startup, which changes
    /// pairwise identifiers on every restart.
    pub pairwise_salt: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(8 * 3600), // 8 hours
            pending_authorization_lifetime: Duration::from_secs(600),
            max_sessions: 100_000,
            salt_size: 8,
            pairwise_salt: None,
        }
    }
}

/// Provider capabilities, advertised in discovery and enforced by the flows.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Scopes clients may request.
    pub scopes_supported: Vec<String>,
    /// Claims the provider is willing to release.
    pub claims_supported: Vec<String>,
    /// Response modes accepted at the authorization endpoint.
    pub response_modes_supported: Vec<String>,
    /// Subject identifier types.
    pub subject_types_supported: Vec<String>,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        let claims = default_scope_claims();
        Self {
            scopes_supported: ["openid", "profile", "email", "address", "phone", "offline_access"]
                .into_iter()
                .map(String::from)
                .collect(),
            claims_supported: claims.into_values().flatten().collect(),
            response_modes_supported: ["query", "fragment", "form_post"]
                .into_iter()
                .map(String::from)
                .collect(),
            subject_types_supported: vec!["public".to_string(), "pairwise".to_string()],
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl ProviderConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        let issuer = url::Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("issuer is not a URL: {e}")))?;
        if issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(ConfigError::InvalidValue(
                "issuer must not contain a query or fragment".to_string(),
            ));
        }

        let mut seen = Vec::new();
        for (name, path) in self.endpoints.paths() {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "endpoints.{name} must start with '/', got '{path}'"
                )));
            }
            if seen.contains(&path) {
                return Err(ConfigError::InvalidValue(format!(
                    "endpoints.{name} reuses path '{path}'"
                )));
            }
            seen.push(path);
        }

        self.signing.algorithm.parse::<SigningAlgorithm>().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                self.signing.algorithm
            ))
        })?;
        if self.signing.private_key_path.is_some() != self.signing.public_key_path.is_some() {
            return Err(ConfigError::InvalidValue(
                "signing.private_key_path and signing.public_key_path must be set together"
                    .to_string(),
            ));
        }

        let lifetimes = [
            ("authorization_code_lifetime", self.tokens.authorization_code_lifetime),
            ("id_token_lifetime", self.tokens.id_token_lifetime),
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
        ];
        for (name, value) in lifetimes {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!(
                    "tokens.{name} must be > 0"
                )));
            }
        }

        if self.sessions.lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "sessions.lifetime must be > 0".to_string(),
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::InvalidValue(
                "sessions.max_sessions must be > 0".to_string(),
            ));
        }
        if self.sessions.salt_size == 0 {
            return Err(ConfigError::InvalidValue(
                "sessions.salt_size must be > 0".to_string(),
            ));
        }
        if self
            .sessions
            .pairwise_salt
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(ConfigError::InvalidValue(
                "sessions.pairwise_salt must not be empty when set".to_string(),
            ));
        }

        if !self
            .capabilities
            .scopes_supported
            .iter()
            .any(|s| s == "openid")
        {
            return Err(ConfigError::InvalidValue(
                "capabilities.scopes_supported must contain 'openid'".to_string(),
            ));
        }
        for mode in &self.capabilities.response_modes_supported {
            match mode.as_str() {
                "query" | "fragment" | "form_post" => {}
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid response mode: '{other}'. Must be query, fragment, or form_post"
                    )));
                }
            }
        }
        for subject_type in &self.capabilities.subject_types_supported {
            match subject_type.as_str() {
                "public" | "pairwise" => {}
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid subject type: '{other}'. Must be public or pairwise"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Returns the issuer without a trailing slash, for building endpoint URLs.
    #[must_use]
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Builds the absolute URL of an endpoint path.
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.issuer_base(), path)
    }
}

/// Converts a configured duration into a `time::Duration`.
#[must_use]
pub fn to_time_duration(value: Duration) -> time::Duration {
    time::Duration::try_from(value).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProviderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoints.jwks, "/jwks");
        assert!(config.tokens.id_token_lifetime < config.tokens.refresh_token_lifetime);
    }

    #[test]
    fn test_default_scope_claims() {
        let config = ProviderConfig::default();
        assert_eq!(config.scope_claims["openid"], vec!["sub".to_string()]);
        assert!(config.scope_claims["email"].contains(&"email".to_string()));
        assert!(!config.scope_claims["profile"].contains(&"email".to_string()));
    }

    #[test]
    fn test_invalid_algorithm_rejected() {
        let mut config = ProviderConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("HS256"));
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let mut config = ProviderConfig::default();
        config.endpoints.userinfo = "/token".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut config = ProviderConfig::default();
        config.endpoints.jwks = "jwks".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_issuer_must_be_url() {
        let mut config = ProviderConfig::default();
        config.issuer = "not a url".to_string();
        assert!(config.validate().is_err());

        config.issuer = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_key_paths_must_be_paired() {
        let mut config = ProviderConfig::default();
        config.signing.private_key_path = Some(PathBuf::from("/etc/kestrel/key.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_pairwise_salt_rejected() {
        let mut config = ProviderConfig::default();
        config.sessions.pairwise_salt = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_url() {
        let mut config = ProviderConfig::default();
        config.issuer = "https://op.example.com/".to_string();
        assert_eq!(
            config.endpoint_url(&config.endpoints.token),
            "https://op.example.com/token"
        );
    }

    #[test]
    fn test_deserialize_humantime() {
        let json = serde_json::json!({
            "issuer": "https://op.example.com",
            "tokens": { "id_token_lifetime": "5m", "refresh_token_lifetime": "14d" }
        });
        let config: ProviderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.tokens.id_token_lifetime, Duration::from_secs(300));
        assert_eq!(
            config.tokens.refresh_token_lifetime,
            Duration::from_secs(14 * 24 * 3600)
        );
        // untouched values keep their defaults
        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(3600));
    }
}
