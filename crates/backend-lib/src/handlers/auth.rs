// ============================
// crates/backend-lib/src/handlers/auth.rs
// ============================
//! Password login.
use axum::{extract::State, Json};
use dashboard_common::{LoginRequest, TokenResponse};
use zeroize::Zeroize;

use crate::auth::verify_password_secure;
use crate::error::{AppError, AuthError};
use crate::AppState;

/// `POST /auth/login`
///
/// Unknown users and wrong passwords are indistinguishable to the caller.
pub async fn login(
    State(state): State<AppState>,
    Json(mut request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let Some(identity) = state.identities.store().find_by_subject(&request.email).await? else {
        request.password.zeroize();
        tracing::info!(subject = %request.email, "login for unknown subject");
        return Err(AuthError::InvalidCredentials.into());
    };

    // scrypt verification runs on the blocking pool
    let mut password = std::mem::take(&mut request.password);
    let stored_hash = identity.credential_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password_secure(&mut password, &stored_hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))?;

    if !verified {
        tracing::info!(subject = %identity.subject, "login with wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = state
        .tokens
        .mint(&identity.subject)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::info!(subject = %identity.subject, expires_at = %token.expires_at, "login succeeded");

    Ok(Json(TokenResponse::bearer(token.access_token)))
}
