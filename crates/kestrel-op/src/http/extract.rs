//! Protocol parameter extractors.
//!
//! axum's `Form` and `Query` reject malformed input with plain-text 415 and
//! 422 responses. These wrappers turn every rejection into an OAuth
//! `invalid_request` error with a JSON body and status 400.

use axum::{
    Form,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::error::OpError;

/// `application/x-www-form-urlencoded` request body.
#[derive(Debug, Clone, Default)]
pub struct OAuthForm<T>(pub T);

impl<T, S> FromRequest<S> for OAuthForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = OpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(Self(value)),
            Err(rejection) => Err(OpError::invalid_request(rejection.body_text())),
        }
    }
}

/// Query string parameters.
#[derive(Debug, Clone, Default)]
pub struct OAuthQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for OAuthQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = OpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(OpError::invalid_request(rejection.body_text())),
        }
    }
}
