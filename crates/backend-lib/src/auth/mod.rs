// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.

pub mod extractor;
pub mod identity;
pub mod negotiator;
pub mod password;
pub mod token;

pub use extractor::AuthenticatedUser;
pub use identity::IdentityResolver;
pub use negotiator::{
    bearer_token, parse_handshake, AuthFailure, AuthNegotiator, Authenticated, CredentialSource,
    Handshake, HandshakeReader, PresentedCredentials, POLICY_VIOLATION,
};
pub use password::{hash_password, verify_password, verify_password_secure, PasswordCost};
pub use token::{Token, TokenIssuer};
