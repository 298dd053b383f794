//! Client Registry.
//!
//! Resolves client identifiers to registrations and authenticates clients at
//! the token and introspection endpoints. Every lookup is a keyed read on the
//! [`ClientStore`]; resolving a client never changes the registry.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, info, warn};

use crate::OpResult;
use crate::error::OpError;
use crate::storage::ClientStore;
use crate::types::{Client, GrantType, TokenEndpointAuthMethod};

/// Credentials presented by a client, in the order they are looked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// `Authorization: Basic` header.
    Basic {
        /// Client id.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
    /// `client_id` and `client_secret` form parameters.
    Post {
        /// Client id.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
    /// A bare `client_id` parameter (public clients).
    ClientIdOnly {
        /// Client id.
        client_id: String,
    },
    /// Nothing identifying the client.
    None,
}

impl ClientCredentials {
    /// Picks the credentials from the request parts, Basic header first.
    #[must_use]
    pub fn from_request(
        authorization: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Self {
        if let Some((client_id, client_secret)) = authorization.and_then(parse_basic_auth) {
            return Self::Basic {
                client_id,
                client_secret,
            };
        }
        match (client_id, client_secret) {
            (Some(id), Some(secret)) => Self::Post {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
            },
            (Some(id), None) => Self::ClientIdOnly {
                client_id: id.to_string(),
            },
            _ => Self::None,
        }
    }

    /// The client id carried by the credentials.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::Basic { client_id, .. }
            | Self::Post { client_id, .. }
            | Self::ClientIdOnly { client_id } => Some(client_id),
            Self::None => None,
        }
    }

    /// The auth method these credentials correspond to.
    #[must_use]
    pub fn method(&self) -> Option<TokenEndpointAuthMethod> {
        match self {
            Self::Basic { .. } => Some(TokenEndpointAuthMethod::ClientSecretBasic),
            Self::Post { .. } => Some(TokenEndpointAuthMethod::ClientSecretPost),
            Self::ClientIdOnly { .. } => Some(TokenEndpointAuthMethod::None),
            Self::None => None,
        }
    }
}

/// Parses an `Authorization: Basic` header value into id and secret.
///
/// Returns `None` for other schemes or malformed values.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = credentials.split_once(':')?;
    if client_id.is_empty() {
        return None;
    }
    Some((client_id.to_string(), client_secret.to_string()))
}

/// Keyed access to client registrations.
#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<dyn ClientStore>,
}

impl ClientRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self { store }
    }

    /// Resolves an active client.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` if the id is not registered or the client is
    /// inactive.
    pub async fn resolve(&self, client_id: &str) -> OpResult<Client> {
        match self.store.find(client_id).await? {
            Some(client) if client.active => Ok(client),
            Some(_) => {
                debug!(client_id = %client_id, "Client is inactive");
                Err(OpError::unknown_client(client_id))
            }
            None => Err(OpError::unknown_client(client_id)),
        }
    }

    /// Checks `redirect_uri` against the client's registered set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the URI is not registered.
    pub fn validate_redirect(&self, client: &Client, redirect_uri: &str) -> OpResult<()> {
        if client.is_redirect_uri_allowed(redirect_uri) {
            Ok(())
        } else {
            warn!(
                client_id = %client.client_id,
                redirect_uri = %redirect_uri,
                "Redirect URI not registered"
            );
            Err(OpError::invalid_request(format!(
                "redirect_uri '{redirect_uri}' is not registered for this client"
            )))
        }
    }

    /// Authenticates a client at the token or introspection endpoint.
    ///
    /// The method used must match the client's registered
    /// `token_endpoint_auth_method`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when no client is identified,
    /// `UnknownClient` for unregistered ids and `UnauthorizedClient` when
    /// the method or secret is wrong.
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> OpResult<Client> {
        let (Some(client_id), Some(method)) = (credentials.client_id(), credentials.method())
        else {
            return Err(OpError::invalid_request("client authentication is required"));
        };

        let client = self.resolve(client_id).await?;

        if client.token_endpoint_auth_method != method {
            warn!(
                client_id = %client_id,
                expected = %client.token_endpoint_auth_method,
                presented = %method,
                "Client used the wrong authentication method"
            );
            return Err(OpError::unauthorized_client(format!(
                "client is registered for {}",
                client.token_endpoint_auth_method
            )));
        }

        match credentials {
            ClientCredentials::Basic { client_secret, .. }
            | ClientCredentials::Post { client_secret, .. } => {
                if !client.verify_secret(client_secret) {
                    warn!(client_id = %client_id, "Client secret mismatch");
                    return Err(OpError::unauthorized_client("invalid client credentials"));
                }
            }
            ClientCredentials::ClientIdOnly { .. } | ClientCredentials::None => {}
        }

        debug!(client_id = %client_id, method = %method, "Client authenticated");
        Ok(client)
    }

    /// Checks that the client may use `grant_type`.
    ///
    /// # Errors
    ///
    /// Returns `UnauthorizedClient` when the grant type is not registered.
    pub fn check_grant_type(&self, client: &Client, grant_type: GrantType) -> OpResult<()> {
        if client.is_grant_type_allowed(grant_type) {
            Ok(())
        } else {
            Err(OpError::unauthorized_client(format!(
                "client may not use the {grant_type} grant"
            )))
        }
    }

    /// Registers a client after validating it.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid registration.
    pub async fn register(&self, client: Client) -> OpResult<()> {
        client
            .validate()
            .map_err(|e| OpError::configuration(format!("client '{}': {e}", client.client_id)))?;
        let client_id = client.client_id.clone();
        self.store.register(client).await?;
        info!(client_id = %client_id, "Client registered");
        Ok(())
    }

    /// All registered clients.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn list(&self) -> OpResult<Vec<Client>> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryClientStore;
    use tokio_test::block_on;

    async fn registry() -> ClientRegistry {
        let registry = ClientRegistry::new(Arc::new(MemoryClientStore::new()));
        registry
            .register(
                Client::confidential("conf", "s3cret", vec!["https://rp/cb".to_string()]).unwrap(),
            )
            .await
            .unwrap();
        registry
            .register(Client::public("spa", vec!["https://spa/cb".to_string()]))
            .await
            .unwrap();
        let mut inactive = Client::public("old", vec!["https://old/cb".to_string()]);
        inactive.active = false;
        registry.register(inactive).await.unwrap();
        registry
    }

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    #[tokio::test]
    async fn test_resolve() {
        let registry = registry().await;
        assert_eq!(registry.resolve("conf").await.unwrap().client_id, "conf");
        assert!(matches!(
            registry.resolve("nope").await,
            Err(OpError::UnknownClient { .. })
        ));
        assert!(matches!(
            registry.resolve("old").await,
            Err(OpError::UnknownClient { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_redirect() {
        let registry = registry().await;
        let client = registry.resolve("conf").await.unwrap();
        assert!(registry.validate_redirect(&client, "https://rp/cb").is_ok());
        assert!(matches!(
            registry.validate_redirect(&client, "https://evil/cb"),
            Err(OpError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_authenticate_basic() {
        let registry = registry().await;
        let header = basic("conf", "s3cret");
        let creds = ClientCredentials::from_request(Some(&header), None, None);
        assert_eq!(registry.authenticate(&creds).await.unwrap().client_id, "conf");

        let header = basic("conf", "wrong");
        let creds = ClientCredentials::from_request(Some(&header), None, None);
        assert!(matches!(
            registry.authenticate(&creds).await,
            Err(OpError::UnauthorizedClient { .. })
        ));
    }

    #[tokio::test]
    async fn test_method_must_match_registration() {
        let registry = registry().await;
        let creds = ClientCredentials::from_request(None, Some("conf"), Some("s3cret"));
        assert!(matches!(
            registry.authenticate(&creds).await,
            Err(OpError::UnauthorizedClient { .. })
        ));

        let creds = ClientCredentials::from_request(None, Some("conf"), None);
        assert!(matches!(
            registry.authenticate(&creds).await,
            Err(OpError::UnauthorizedClient { .. })
        ));
    }

    #[tokio::test]
    async fn test_public_client_by_id() {
        let registry = registry().await;
        let creds = ClientCredentials::from_request(None, Some("spa"), None);
        assert!(registry.authenticate(&creds).await.unwrap().is_public());
    }

    #[tokio::test]
    async fn test_unknown_client_authentication() {
        let registry = registry().await;
        let creds = ClientCredentials::from_request(None, Some("ghost"), None);
        let err = registry.authenticate(&creds).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "unauthorized_client");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let registry = registry().await;
        assert!(matches!(
            registry.authenticate(&ClientCredentials::None).await,
            Err(OpError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_client() {
        let registry = registry().await;
        let client = Client::public("bad", vec!["not a url".to_string()]);
        assert!(matches!(
            registry.register(client).await,
            Err(OpError::Configuration { .. })
        ));
    }

    #[test]
    fn test_parse_basic_auth() {
        let header = basic("id", "se:cret");
        assert_eq!(
            parse_basic_auth(&header),
            Some(("id".to_string(), "se:cret".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
    }

    #[test]
    fn test_check_grant_type() {
        let registry = ClientRegistry::new(Arc::new(MemoryClientStore::new()));
        let mut client = Client::public("c", vec!["https://c/cb".to_string()]);
        client.grant_types = vec![GrantType::AuthorizationCode];
        assert!(registry.check_grant_type(&client, GrantType::AuthorizationCode).is_ok());
        assert!(registry.check_grant_type(&client, GrantType::RefreshToken).is_err());
    }

    #[test]
    fn test_list_includes_inactive() {
        let registry = block_on(registry());
        let mut ids: Vec<String> = block_on(registry.list())
            .unwrap()
            .into_iter()
            .map(|c| c.client_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["conf", "old", "spa"]);
    }
}
