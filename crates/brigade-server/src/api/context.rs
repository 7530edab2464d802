//! Request authentication: bearer token to principal.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use brigade_core::Principal;

use crate::api::error::ApiError;
use crate::server::AppState;

/// The authenticated principal for a request.
///
/// Extraction fails with 401 when the Authorization header is missing,
/// is not a bearer token, or resolves to no principal.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(ApiError::missing_auth)?;

        let principal = state
            .token_resolver
            .resolve(token)
            .await
            .map_err(ApiError::from)?;
        Ok(Self(principal))
    }
}
