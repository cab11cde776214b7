// ============================
// crates/backend-lib/src/auth/extractor.rs
// ============================
//! Request-based authentication for the HTTP surface.
use axum::{extract::FromRequestParts, http::request::Parts};

use super::negotiator::bearer_token;
use crate::error::{AppError, AuthError};
use crate::storage::Identity;
use crate::AppState;

/// The identity behind a request's `Authorization: Bearer` header.
///
/// Rejects with 401 when the header is absent or the token does not verify.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let identity = state.negotiator.authenticate_token(&token).await?;
        Ok(Self(identity))
    }
}
