//! Discovery and JWKS handlers.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::ProviderState;

/// Handler for `GET /.well-known/openid-configuration`.
///
/// All endpoint URLs are built from the configured issuer and paths.
pub async fn discovery_handler(State(state): State<ProviderState>) -> impl IntoResponse {
    let document = state.provider.discovery_document();
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(document),
    )
}

/// Handler for `GET /jwks`.
///
/// Returns the active key first, followed by keys kept for verification
/// after a rotation.
pub async fn jwks_handler(State(state): State<ProviderState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(state.provider.jwks()),
    )
}
