//! Error responses.
//!
//! Every [`OpError`] becomes a JSON body with `error` and
//! `error_description`. 401 responses carry a `WWW-Authenticate: Bearer`
//! challenge. Server-side failures are logged here and answered with a
//! generic description.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::OpError;

/// OAuth 2.0 error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub error: String,
    /// Human-readable description.
    pub error_description: String,
}

impl From<&OpError> for ErrorBody {
    fn from(err: &OpError) -> Self {
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: err.public_description(),
        }
    }
}

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for OpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!(error = %self, category = %self.category(), "Request failed");
        } else {
            debug!(error = %self, status = %status, "Request rejected");
        }

        let body = ErrorBody::from(&self);

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if status == StatusCode::UNAUTHORIZED {
            let challenge = build_www_authenticate_header(&body.error, &body.error_description);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Builds the `WWW-Authenticate` value (RFC 6750 Section 3).
fn build_www_authenticate_header(error: &str, description: &str) -> String {
    let description = description.replace('\\', "\\\\").replace('"', "\\\"");
    format!("Bearer error=\"{error}\", error_description=\"{description}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_client_error_body() {
        let response = OpError::unknown_client("c9").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthorized_client");
        assert_eq!(body["error_description"], "Unknown client: c9");
    }

    #[tokio::test]
    async fn test_token_error_has_challenge() {
        let response = OpError::TokenRevoked.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.starts_with("Bearer error=\"invalid_token\""));
    }

    #[tokio::test]
    async fn test_internal_error_is_generic() {
        let response = OpError::storage("disk /var/lib/kestrel is full").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_request");
        assert!(!body["error_description"].as_str().unwrap().contains("/var/lib"));
    }

    #[test]
    fn test_challenge_escaping() {
        assert_eq!(
            build_www_authenticate_header("invalid_token", "say \"hi\""),
            "Bearer error=\"invalid_token\", error_description=\"say \\\"hi\\\"\""
        );
    }
}
