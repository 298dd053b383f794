use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;

use kestrel_op::config::ProviderConfig;
use kestrel_op::types::{Client, GrantType, SubjectType, TokenEndpointAuthMethod};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Provider core configuration (issuer, endpoints, tokens, signing, sessions)
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Trusted-header authentication backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Clients registered at startup
    #[serde(default)]
    pub clients: Vec<ClientRegistration>,
    /// User directory consulted by the backend, keyed by subject id
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.provider
            .validate()
            .map_err(|e| format!("provider: {e}"))?;
        if self.backend.header.trim().is_empty() {
            return Err("backend.header must not be empty".into());
        }
        if self.backend.login_url.trim().is_empty() {
            return Err("backend.login_url must not be empty".into());
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if !seen.insert(client.client_id.as_str()) {
                return Err(format!("clients: duplicate client_id '{}'", client.client_id));
            }
            let needs_secret = client.token_endpoint_auth_method != TokenEndpointAuthMethod::None;
            if needs_secret && client.client_secret.as_deref().unwrap_or("").is_empty() {
                return Err(format!(
                    "clients: '{}' uses {} and needs a client_secret",
                    client.client_id, client.token_endpoint_auth_method
                ));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let ip = self
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Header carrying the authenticated subject id, set by the fronting proxy
    #[serde(default = "default_backend_header")]
    pub header: String,
    /// Login page the user agent is sent to when the header is missing
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// Accept subjects that are not listed in `users`
    #[serde(default)]
    pub allow_unknown_users: bool,
    /// Authentication method reported for header-authenticated users
    #[serde(default = "default_authn_method")]
    pub authn_method: String,
}

fn default_backend_header() -> String {
    "x-remote-user".into()
}
fn default_login_url() -> String {
    "/login".into()
}
fn default_authn_method() -> String {
    "proxy".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            header: default_backend_header(),
            login_url: default_login_url(),
            allow_unknown_users: false,
            authn_method: default_authn_method(),
        }
    }
}

/// One user of the directory. Attributes are released as claims.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(default)]
    pub authn_method: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A client registration as written in the configuration file.
///
/// The plaintext secret only lives in the file; it is hashed when the client
/// is registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    #[serde(default)]
    pub subject_type: SubjectType,
    #[serde(default)]
    pub allowed_scopes: Vec<String>,
}

fn default_grant_types() -> Vec<GrantType> {
    vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
}

impl ClientRegistration {
    /// Turns the registration into a client, hashing the secret.
    pub fn to_client(&self) -> Result<Client, kestrel_op::types::ClientValidationError> {
        let client_secret_hash = match self.client_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Some(Client::hash_secret(secret)?),
            _ => None,
        };
        let client = Client {
            client_id: self.client_id.clone(),
            client_secret_hash,
            client_name: self.client_name.clone(),
            contacts: self.contacts.clone(),
            redirect_uris: self.redirect_uris.clone(),
            grant_types: self.grant_types.clone(),
            token_endpoint_auth_method: self.token_endpoint_auth_method,
            subject_type: self.subject_type,
            allowed_scopes: self.allowed_scopes.clone(),
            active: true,
        };
        client.validate()?;
        Ok(client)
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        if let Some(p) = path {
            let pb = PathBuf::from(p);
            if pb.exists() {
                builder = builder.add_source(File::from(pb));
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("KESTREL")
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let app: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        app.validate()?;
        Ok(app)
    }
}
