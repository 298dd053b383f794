//! Token endpoint handler.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::extract::OAuthForm;
use super::{ProviderState, authorization_header};
use crate::error::OpError;
use crate::flow::{TokenFlow, TokenRequest};

/// Handler for `POST /token`.
///
/// Clients authenticate with `Authorization: Basic`, with
/// `client_id`/`client_secret` form parameters, or (public clients) with
/// `client_id` alone. Both success and error responses are marked
/// uncacheable.
pub async fn token_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    request: Result<OAuthForm<TokenRequest>, OpError>,
) -> Response {
    let mut flow = TokenFlow::new(&state.provider);
    let result = match request {
        Ok(OAuthForm(request)) => flow.run(request, authorization_header(&headers)).await,
        Err(e) => Err(e),
    };
    let mut response = match result {
        Ok(tokens) => Json(tokens).into_response(),
        Err(e) => {
            if e.is_client_error() {
                warn!(error = %e, "Token request rejected");
            }
            e.into_response()
        }
    };

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
