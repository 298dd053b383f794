//! Relying party (client) registration types.
//!
//! Clients are registered out of band, either from the configuration file or
//! through [`crate::storage::ClientStore::register`], and are immutable while a
//! request is being served.

use std::str::FromStr;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types accepted at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(other.to_string()),
        }
    }
}

// =============================================================================
// Token Endpoint Auth Method
// =============================================================================

/// How a client authenticates at the token and introspection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic authentication with client_id and secret.
    #[default]
    ClientSecretBasic,
    /// client_id and client_secret form parameters.
    ClientSecretPost,
    /// Public client, identified by client_id only (PKCE required).
    None,
}

impl TokenEndpointAuthMethod {
    /// Returns the registered metadata value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Subject Type
// =============================================================================

/// Subject identifier policy for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    /// The same `sub` value is released to every client.
    Public,
    /// A per-sector `sub` value is released. This is the default.
    #[default]
    Pairwise,
}

impl SubjectType {
    /// Returns the metadata value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Pairwise => "pairwise",
        }
    }
}

// =============================================================================
// Client
// =============================================================================

fn default_grant_types() -> Vec<GrantType> {
    vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
}

fn default_true() -> bool {
    true
}

/// A registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    /// Unique client identifier.
    pub client_id: String,

    /// Argon2 PHC hash of the client secret (confidential clients).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,

    /// Human-readable name, shown to the user as the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Contact addresses for the client's operators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,

    /// Registered redirect URIs (matched exactly).
    pub redirect_uris: Vec<String>,

    /// Grant types the client may use.
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<GrantType>,

    /// Token endpoint authentication method.
    #[serde(default)]
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,

    /// Subject identifier policy.
    #[serde(default)]
    pub subject_type: SubjectType,

    /// Scopes the client may request. Empty means every supported scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_scopes: Vec<String>,

    /// Inactive clients resolve as unknown.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Errors found when validating a client registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    /// client_id is empty.
    #[error("client_id must not be empty")]
    EmptyClientId,

    /// No redirect URI registered.
    #[error("at least one redirect_uri is required")]
    NoRedirectUris,

    /// A redirect URI is not an absolute URL or carries a fragment.
    #[error("invalid redirect_uri '{0}'")]
    InvalidRedirectUri(String),

    /// No grant types registered.
    #[error("at least one grant_type is required")]
    NoGrantTypes,

    /// A confidential auth method was registered without a secret.
    #[error("token_endpoint_auth_method '{0}' requires a client secret")]
    MissingSecret(TokenEndpointAuthMethod),

    /// Hashing the secret failed.
    #[error("failed to hash client secret: {0}")]
    SecretHash(String),
}

impl Client {
    /// Creates a confidential client using `client_secret_basic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be hashed.
    pub fn confidential(
        client_id: impl Into<String>,
        secret: &str,
        redirect_uris: Vec<String>,
    ) -> Result<Self, ClientValidationError> {
        Ok(Self {
            client_id: client_id.into(),
            client_secret_hash: Some(Self::hash_secret(secret)?),
            client_name: None,
            contacts: Vec::new(),
            redirect_uris,
            grant_types: default_grant_types(),
            token_endpoint_auth_method: TokenEndpointAuthMethod::ClientSecretBasic,
            subject_type: SubjectType::default(),
            allowed_scopes: Vec::new(),
            active: true,
        })
    }

    /// Creates a public client (auth method `none`).
    #[must_use]
    pub fn public(client_id: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret_hash: None,
            client_name: None,
            contacts: Vec::new(),
            redirect_uris,
            grant_types: default_grant_types(),
            token_endpoint_auth_method: TokenEndpointAuthMethod::None,
            subject_type: SubjectType::default(),
            allowed_scopes: Vec::new(),
            active: true,
        }
    }

    /// Sets the subject type.
    #[must_use]
    pub fn with_subject_type(mut self, subject_type: SubjectType) -> Self {
        self.subject_type = subject_type;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Hashes a plaintext secret with Argon2id for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub fn hash_secret(secret: &str) -> Result<String, ClientValidationError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ClientValidationError::SecretHash(e.to_string()))
    }

    /// Verifies a plaintext secret against the stored hash.
    ///
    /// Returns `false` when no hash is stored or the hash is malformed.
    #[must_use]
    pub fn verify_secret(&self, secret: &str) -> bool {
        let Some(hash) = self.client_secret_hash.as_deref() else {
            return false;
        };
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Validates the registration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }
        if self.redirect_uris.is_empty() {
            return Err(ClientValidationError::NoRedirectUris);
        }
        for uri in &self.redirect_uris {
            match url::Url::parse(uri) {
                Ok(parsed) if parsed.fragment().is_none() && parsed.has_host() => {}
                _ => return Err(ClientValidationError::InvalidRedirectUri(uri.clone())),
            }
        }
        if self.grant_types.is_empty() {
            return Err(ClientValidationError::NoGrantTypes);
        }
        if self.token_endpoint_auth_method != TokenEndpointAuthMethod::None
            && self.client_secret_hash.is_none()
        {
            return Err(ClientValidationError::MissingSecret(
                self.token_endpoint_auth_method,
            ));
        }
        Ok(())
    }

    /// Returns `true` if the client authenticates without a secret.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method == TokenEndpointAuthMethod::None
    }

    /// Exact-match check against the registered redirect URIs.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    /// Returns `true` if the client may request the scope.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.allowed_scopes.is_empty() || self.allowed_scopes.iter().any(|s| s == scope)
    }

    /// Returns `true` if the client may use the grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Sector identifier for pairwise subjects: the host of the first
    /// registered redirect URI.
    #[must_use]
    pub fn sector_identifier(&self) -> Option<String> {
        self.redirect_uris
            .first()
            .and_then(|uri| url::Url::parse(uri).ok())
            .and_then(|uri| uri.host_str().map(str::to_string))
    }

    /// Name shown to the user as the requester, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(&self.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        Client::confidential("c1", "s3cret", vec!["https://rp/cb".to_string()]).unwrap()
    }

    #[test]
    fn test_grant_type_round_trip() {
        assert_eq!(GrantType::AuthorizationCode.as_str(), "authorization_code");
        assert_eq!(
            "refresh_token".parse::<GrantType>(),
            Ok(GrantType::RefreshToken)
        );
        assert!("password".parse::<GrantType>().is_err());
    }

    #[test]
    fn test_secret_verification() {
        let client = test_client();
        assert!(client.verify_secret("s3cret"));
        assert!(!client.verify_secret("wrong"));
        assert!(client.client_secret_hash.as_deref().unwrap().starts_with("$argon2id$"));
    }

    #[test]
    fn test_public_client_has_no_secret() {
        let client = Client::public("spa", vec!["https://spa.example.com/cb".to_string()]);
        assert!(client.is_public());
        assert!(!client.verify_secret(""));
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let client = test_client();
        assert!(client.is_redirect_uri_allowed("https://rp/cb"));
        assert!(!client.is_redirect_uri_allowed("https://rp/cb/"));
        assert!(!client.is_redirect_uri_allowed("https://rp/cb?x=1"));
    }

    #[test]
    fn test_validate_rejects_fragment_redirect() {
        let mut client = test_client();
        client.redirect_uris = vec!["https://rp/cb#frag".to_string()];
        assert_eq!(
            client.validate(),
            Err(ClientValidationError::InvalidRedirectUri(
                "https://rp/cb#frag".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_requires_secret_for_confidential() {
        let mut client = test_client();
        client.client_secret_hash = None;
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_scope_allowed() {
        let mut client = test_client();
        assert!(client.is_scope_allowed("email"));
        client.allowed_scopes = vec!["openid".to_string(), "profile".to_string()];
        assert!(client.is_scope_allowed("profile"));
        assert!(!client.is_scope_allowed("email"));
    }

    #[test]
    fn test_subject_type_defaults_to_pairwise() {
        let json = serde_json::json!({
            "client_id": "c1",
            "redirect_uris": ["https://rp/cb"],
            "token_endpoint_auth_method": "none"
        });
        let client: Client = serde_json::from_value(json).unwrap();
        assert_eq!(client.subject_type, SubjectType::Pairwise);
        assert!(client.active);
        assert!(client.is_grant_type_allowed(GrantType::AuthorizationCode));
    }

    #[test]
    fn test_sector_identifier() {
        let client = Client::public(
            "c2",
            vec!["https://app.example.org:8443/callback".to_string()],
        );
        assert_eq!(client.sector_identifier().as_deref(), Some("app.example.org"));
    }

    #[test]
    fn test_display_name() {
        let client = test_client();
        assert_eq!(client.display_name(), "c1");
        let named = client.with_name("Relying Party");
        assert_eq!(named.display_name(), "Relying Party");
    }
}
