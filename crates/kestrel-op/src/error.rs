//! Provider error types.
//!
//! Every failure surfaced by the provider core is an [`OpError`]. The HTTP
//! layer turns these into OAuth 2.0 / OpenID Connect error bodies (see
//! [`crate::http::error`]).

use std::fmt;

use axum::http::StatusCode;

use crate::token::jwt::JwtError;

/// Errors that can occur while processing a provider request.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The request is malformed or a required parameter is missing.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The client identifier is not registered (or the client is inactive).
    #[error("Unknown client: {client_id}")]
    UnknownClient {
        /// The client identifier that could not be resolved.
        client_id: String,
    },

    /// The client failed authentication or is not allowed to use this flow.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of why the client is not authorized.
        message: String,
    },

    /// The authentication backend refused the end user.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Reason given by the backend.
        message: String,
    },

    /// The authorization code or refresh token is invalid or already used.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The requested response type is not supported.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// The requested grant type is not supported.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// No session exists with the given id.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The session id that was looked up.
        session_id: String,
    },

    /// The session exists but its lifetime has elapsed.
    #[error("Session expired: {session_id}")]
    SessionExpired {
        /// The expired session id.
        session_id: String,
    },

    /// The token lifetime has elapsed.
    #[error("Token expired")]
    TokenExpired,

    /// The token, or the session owning it, has been revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// The token signature could not be verified or the token was not issued here.
    #[error("Token signature invalid")]
    SignatureInvalid,

    /// A backing store refused a new entry because it is full.
    #[error("Capacity exhausted: {message}")]
    CapacityError {
        /// Which store is exhausted.
        message: String,
    },

    /// An error occurred while storing or retrieving provider data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The provider configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl OpError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownClient` error.
    #[must_use]
    pub fn unknown_client(client_id: impl Into<String>) -> Self {
        Self::UnknownClient {
            client_id: client_id.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `SessionNotFound` error.
    #[must_use]
    pub fn session_not_found(session_id: impl fmt::Display) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Creates a new `SessionExpired` error.
    #[must_use]
    pub fn session_expired(session_id: impl fmt::Display) -> Self {
        Self::SessionExpired {
            session_id: session_id.to_string(),
        }
    }

    /// Creates a new `CapacityError`.
    #[must_use]
    pub fn capacity(message: impl Into<String>) -> Self {
        Self::CapacityError {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller caused this error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::CapacityError { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if the end user has to authenticate again.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. } | Self::SessionExpired { .. }
        )
    }

    /// Returns `true` if this is a token verification error.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::TokenRevoked | Self::SignatureInvalid
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::UnsupportedGrantType { .. } => ErrorCategory::Validation,
            Self::UnknownClient { .. } | Self::UnauthorizedClient { .. } => ErrorCategory::Client,
            Self::InvalidGrant { .. } | Self::AccessDenied { .. } => ErrorCategory::Grant,
            Self::SessionNotFound { .. } | Self::SessionExpired { .. } => ErrorCategory::Session,
            Self::TokenExpired | Self::TokenRevoked | Self::SignatureInvalid => {
                ErrorCategory::Token
            }
            Self::CapacityError { .. } | Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 / OpenID Connect error code for this error.
    ///
    /// Server-side failures deliberately collapse to `invalid_request` so that
    /// nothing about the internals is revealed to the caller.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnknownClient { .. } | Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::AccessDenied { .. } => "access_denied",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::SessionNotFound { .. } | Self::SessionExpired { .. } => "login_required",
            Self::TokenExpired | Self::TokenRevoked | Self::SignatureInvalid => "invalid_token",
            Self::CapacityError { .. } => "temporarily_unavailable",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "invalid_request"
            }
        }
    }

    /// Returns a description that is safe to send to the caller.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::CapacityError { .. } => "The provider is temporarily unable to accept new sessions".to_string(),
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "The request could not be processed".to_string()
            }
            Self::TokenExpired => "The token has expired".to_string(),
            Self::TokenRevoked => "The token has been revoked".to_string(),
            Self::SignatureInvalid => "The token could not be verified".to_string(),
            Self::SessionNotFound { .. } => "No active session, the user must authenticate again".to_string(),
            Self::SessionExpired { .. } => "The session has expired, the user must authenticate again".to_string(),
            other => other.to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. }
            | Self::UnknownClient { .. }
            | Self::UnauthorizedClient { .. }
            | Self::InvalidGrant { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::UnsupportedGrantType { .. } => StatusCode::BAD_REQUEST,
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::SessionNotFound { .. }
            | Self::SessionExpired { .. }
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::CapacityError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JwtError> for OpError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => Self::TokenExpired,
            JwtError::InvalidSignature
            | JwtError::DecodingError { .. }
            | JwtError::InvalidClaims { .. }
            | JwtError::MissingClaim { .. }
            | JwtError::KeyNotFound { .. } => Self::SignatureInvalid,
            JwtError::EncodingError { message } => Self::internal(message),
            JwtError::KeyGenerationError { message } | JwtError::InvalidKey { message } => {
                Self::configuration(message)
            }
        }
    }
}

/// Categories of provider errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Request parameter validation errors.
    Validation,
    /// Client resolution or authentication errors.
    Client,
    /// Authorization code / refresh token errors.
    Grant,
    /// Session lookup errors.
    Session,
    /// Token verification errors.
    Token,
    /// Storage and capacity errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Client => write!(f, "client"),
            Self::Grant => write!(f, "grant"),
            Self::Session => write!(f, "session"),
            Self::Token => write!(f, "token"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
