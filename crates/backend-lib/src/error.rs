// crates/backend-lib/src/error.rs

//! Central error types + Axum integration.
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures while establishing who a caller is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing auth token")]
    MissingToken,

    /// Malformed, tampered, expired or wrongly signed token
    #[error("Could not validate credentials")]
    InvalidToken,

    /// Token was valid but names nobody we know
    #[error("Could not validate credentials")]
    UnknownSubject,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Identity lookup failed")]
    Lookup(String),
}

/// Failures of the pub/sub relay path.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Malformed upstream message: {0}")]
    Malformed(String),

    #[error("Unexpected relay failure: {0}")]
    Unexpected(String),
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::UpstreamUnavailable(err.to_string())
    }
}

/// Errors of the identity store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Identity already exists: {0}")]
    Duplicate(String),
}

/// Application error types with error codes, for the HTTP surface
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] RelayError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(AuthError::Lookup(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(AuthError::MissingToken) => "AUTH_001",
            AppError::Auth(AuthError::InvalidCredentials) => "AUTH_002",
            AppError::Auth(AuthError::InvalidToken | AuthError::UnknownSubject) => "AUTH_003",
            AppError::Auth(AuthError::Lookup(_)) => "AUTH_004",
            AppError::Upstream(_) => "UPSTREAM_001",
            AppError::Store(_) => "STORE_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Auth(AuthError::Lookup(_)) => "Authentication failed".to_string(),
            AppError::Auth(err) => err.to_string(),
            AppError::Upstream(_) => "Service temporarily unavailable".to_string(),
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::Store(_) | AppError::Internal(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = error_code, "request failed");
        }

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
