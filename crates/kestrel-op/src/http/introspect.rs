//! Token introspection handler (RFC 7662).

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use super::extract::OAuthForm;
use super::{ProviderState, authorization_header};
use crate::flow::{IntrospectionFlow, IntrospectionRequest};

/// Handler for `POST /introspect`.
///
/// The caller must authenticate as a registered client. Tokens that are
/// invalid, revoked, expired or owned by another client come back as
/// `{"active": false}`.
pub async fn introspect_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    OAuthForm(request): OAuthForm<IntrospectionRequest>,
) -> Response {
    let mut flow = IntrospectionFlow::new(&state.provider);
    match flow.run(request, authorization_header(&headers)).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}
