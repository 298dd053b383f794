//! Userinfo endpoint handlers.

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::extract::{OAuthForm, OAuthQuery};
use super::{ProviderState, authorization_header};
use crate::flow::{UserinfoFlow, bearer_token};

/// Bearer token passed as a parameter instead of a header.
#[derive(Debug, Default, Deserialize)]
pub struct AccessTokenParams {
    /// The access token.
    pub access_token: Option<String>,
}

/// Handler for `GET /userinfo`.
pub async fn userinfo_get_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    OAuthQuery(params): OAuthQuery<AccessTokenParams>,
) -> Response {
    userinfo(&state, &headers, params).await
}

/// Handler for `POST /userinfo`.
pub async fn userinfo_post_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    OAuthForm(params): OAuthForm<AccessTokenParams>,
) -> Response {
    userinfo(&state, &headers, params).await
}

async fn userinfo(state: &ProviderState, headers: &HeaderMap, params: AccessTokenParams) -> Response {
    // the header wins over the parameter
    let token = authorization_header(headers)
        .and_then(bearer_token)
        .or(params.access_token.as_deref());

    let mut flow = UserinfoFlow::new(&state.provider);
    match flow.run(token).await {
        Ok(claims) => Json(claims).into_response(),
        Err(e) => e.into_response(),
    }
}
