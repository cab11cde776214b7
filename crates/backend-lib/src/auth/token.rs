// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
//! Signed, time-limited access tokens.
//!
//! Tokens are stateless: validity is decided by signature and expiry alone,
//! there is no server-side session table to consult or revoke.
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, Settings};
use crate::error::AuthError;

/// Clock skew tolerated when checking `exp`, in seconds
const LEEWAY_SECS: u64 = 5;

/// JWT claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted access token
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies access tokens with a process-wide secret
pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], algorithm: Algorithm, lifetime: Duration) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self::new(
            settings.auth.secret_key.as_bytes(),
            settings.token_algorithm()?,
            settings.token_lifetime()?,
        ))
    }

    /// Mint a token for `subject`, expiring after the configured lifetime
    pub fn mint(&self, subject: &str) -> anyhow::Result<Token> {
        self.mint_at(subject, Utc::now())
    }

    fn mint_at(&self, subject: &str, issued_at: DateTime<Utc>) -> anyhow::Result<Token> {
        let expires_at = issued_at
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| anyhow::anyhow!("token expiry out of range"))?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let access_token = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;

        Ok(Token {
            access_token,
            subject: claims.sub,
            issued_at,
            expires_at,
        })
    }

    /// Verify a token and return its subject.
    ///
    /// Malformed encoding, a bad signature, expiry, a different algorithm and
    /// a missing or empty subject all map to [`AuthError::InvalidToken`].
    pub fn parse(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            AuthError::InvalidToken
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims.sub)
    }
}
