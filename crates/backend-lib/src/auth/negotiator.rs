// ============================
// crates/backend-lib/src/auth/negotiator.rs
// ============================
//! In-band authentication for streaming connections.
//!
//! A credential is looked for in a fixed order, stopping at the first
//! non-empty one:
//! 1. the `token` query parameter of the upgrade request,
//! 2. an `Authorization: Bearer` header of the upgrade request,
//! 3. a single `{"token": "..."}` frame sent by the client after the upgrade.
//!
//! At most one frame is read in step 3. Anything that fails to produce a
//! credential ends in [`AuthError::MissingToken`]; a credential that fails
//! verification ends in the verifier's own error. Both surface as an
//! [`AuthFailure`] carrying close code 1008.
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use dashboard_common::AuthHandshake;
use thiserror::Error;

use super::identity::IdentityResolver;
use super::token::TokenIssuer;
use crate::error::AuthError;
use crate::storage::Identity;

/// WebSocket close code for policy violations
pub const POLICY_VIOLATION: u16 = 1008;

/// Where a credential was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Query,
    Header,
    Handshake,
}

/// Credentials surfaced by the transport at upgrade time
#[derive(Debug, Clone, Default)]
pub struct PresentedCredentials {
    pub query: Option<String>,
    pub header: Option<String>,
}

impl PresentedCredentials {
    pub fn from_request(query_token: Option<String>, headers: &HeaderMap) -> Self {
        Self {
            query: query_token,
            header: bearer_token(headers),
        }
    }
}

/// Extract the credential of an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; any other scheme is ignored.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_empty(token)
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Outcome of parsing a handshake frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Token(String),
    Missing,
}

/// Parse the first client frame. Unparseable input is `Missing`, never an error.
pub fn parse_handshake(frame: &str) -> Handshake {
    match serde_json::from_str::<AuthHandshake>(frame) {
        Ok(AuthHandshake { token: Some(token) }) => match non_empty(&token) {
            Some(token) => Handshake::Token(token),
            None => Handshake::Missing,
        },
        Ok(_) => Handshake::Missing,
        Err(e) => {
            tracing::debug!(error = %e, "handshake frame is not a credential message");
            Handshake::Missing
        },
    }
}

/// Source of the single handshake frame.
#[async_trait]
pub trait HandshakeReader: Send {
    /// Next data frame from the client, or `None` if the client closed,
    /// went silent past the deadline, or sent something unusable.
    async fn read_frame(&mut self) -> Option<String>;
}

/// Authentication failure, translated to a connection close.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} (close code {code})")]
pub struct AuthFailure {
    pub code: u16,
    pub reason: String,
}

impl From<AuthError> for AuthFailure {
    fn from(err: AuthError) -> Self {
        Self {
            code: POLICY_VIOLATION,
            reason: err.to_string(),
        }
    }
}

/// A connection that passed authentication
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    pub source: CredentialSource,
}

/// Verifies credentials for both request-based and connection-based auth.
#[derive(Clone)]
pub struct AuthNegotiator {
    tokens: Arc<TokenIssuer>,
    identities: IdentityResolver,
}

impl AuthNegotiator {
    pub fn new(tokens: Arc<TokenIssuer>, identities: IdentityResolver) -> Self {
        Self { tokens, identities }
    }

    /// Verify a bearer token and resolve its subject
    pub async fn authenticate_token(&self, token: &str) -> Result<Identity, AuthError> {
        let subject = self.tokens.parse(token)?;
        self.identities.resolve(&subject).await
    }

    /// Authenticate a freshly accepted streaming connection.
    pub async fn negotiate<R>(
        &self,
        presented: PresentedCredentials,
        reader: &mut R,
    ) -> Result<Authenticated, AuthFailure>
    where
        R: HandshakeReader + ?Sized,
    {
        let (token, source) = Self::locate(presented, reader)
            .await
            .ok_or(AuthError::MissingToken)?;

        let identity = self.authenticate_token(&token).await?;
        Ok(Authenticated { identity, source })
    }

    async fn locate<R>(
        presented: PresentedCredentials,
        reader: &mut R,
    ) -> Option<(String, CredentialSource)>
    where
        R: HandshakeReader + ?Sized,
    {
        if let Some(token) = presented.query.as_deref().and_then(non_empty) {
            return Some((token, CredentialSource::Query));
        }
        if let Some(token) = presented.header.as_deref().and_then(non_empty) {
            return Some((token, CredentialSource::Header));
        }
        match parse_handshake(&reader.read_frame().await?) {
            Handshake::Token(token) => Some((token, CredentialSource::Handshake)),
            Handshake::Missing => None,
        }
    }
}
