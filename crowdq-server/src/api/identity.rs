//! Bearer credential extraction
//!
//! Reads the `AccountAuthentication` and `VoterAuthentication` headers into
//! [`Credentials`]. Resolution against the account directory and voter
//! token issuer happens in the handlers.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::HeaderName, request::Parts, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};

use crowdq_common::token::{parse_bearer, ACCOUNT_AUTH_HEADER, VOTER_AUTH_HEADER};
use crowdq_common::Error;

use super::error::ApiError;
use crate::registry::{Caller, Credentials};

fn bearer(headers: &HeaderMap, name: &str) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(parse_bearer)
        .map(|token| Some(token.to_string()))
        .ok_or_else(|| ApiError(Error::PermissionDenied(format!("malformed {} header", name))))
}

#[async_trait]
impl<S> FromRequestParts<S> for Credentials
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Credentials {
            account_token: bearer(&parts.headers, ACCOUNT_AUTH_HEADER)?,
            voter_token: bearer(&parts.headers, VOTER_AUTH_HEADER)?,
        })
    }
}

/// Attach a freshly issued voter token to a response
pub fn with_issued_token(caller: &Caller, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if let Some(token) = caller.issued_token() {
        let name = HeaderName::try_from(VOTER_AUTH_HEADER);
        let value = HeaderValue::from_str(&format!("Bearer {}", token));
        if let (Ok(name), Ok(value)) = (name, value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
