//! Authorization endpoint handlers.
//!
//! `GET` reads the request from the query string, `POST` from a form body.
//! Parked requests are resumed at `{authorization}/resume?ticket=...`.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use super::extract::{OAuthForm, OAuthQuery};
use super::{ProviderState, header_pairs};
use crate::error::OpError;
use crate::flow::{
    AuthorizationFlow, AuthorizationOutcome, AuthorizationRequest, ResponseMode,
};

/// Query parameters of the resume endpoint.
#[derive(Debug, Deserialize)]
pub struct ResumeParams {
    /// Ticket handed to the login page.
    pub ticket: Option<String>,
}

/// Handler for `GET /authorize`.
pub async fn authorize_get_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    OAuthQuery(request): OAuthQuery<AuthorizationRequest>,
) -> Response {
    authorize(&state, &headers, request).await
}

/// Handler for `POST /authorize`.
pub async fn authorize_post_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    OAuthForm(request): OAuthForm<AuthorizationRequest>,
) -> Response {
    authorize(&state, &headers, request).await
}

/// Handler for `GET /authorize/resume`.
pub async fn resume_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    OAuthQuery(params): OAuthQuery<ResumeParams>,
) -> Response {
    let Some(ticket) = params.ticket else {
        return OpError::invalid_request("ticket is required").into_response();
    };
    let mut flow = AuthorizationFlow::new(&state.provider);
    match flow.resume(&ticket, header_pairs(&headers)).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => e.into_response(),
    }
}

async fn authorize(
    state: &ProviderState,
    headers: &HeaderMap,
    request: AuthorizationRequest,
) -> Response {
    let mut flow = AuthorizationFlow::new(&state.provider);
    match flow.run(request, header_pairs(headers)).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => e.into_response(),
    }
}

fn outcome_response(outcome: AuthorizationOutcome) -> Response {
    match outcome {
        AuthorizationOutcome::Respond(response) => {
            if response.response_mode == ResponseMode::FormPost {
                let mut page = Html(response.to_form_post_html()).into_response();
                page.headers_mut()
                    .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                return page;
            }
            match response.to_redirect_url() {
                Ok(url) => Redirect::to(&url).into_response(),
                Err(e) => OpError::internal(format!("invalid redirect URI: {e}")).into_response(),
            }
        }
        AuthorizationOutcome::LoginRequired { location, .. } => {
            Redirect::to(&location).into_response()
        }
    }
}
