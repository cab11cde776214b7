// ============================
// crates/backend-lib/src/auth/password.rs
// ============================
//! Password hashing and verification.
use scrypt::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Params, Scrypt,
};
use zeroize::Zeroize;

/// scrypt cost used when nothing else is configured (log2 N)
pub const DEFAULT_PASSWORD_COST: u8 = 15;

/// scrypt work factor for newly created hashes.
///
/// Verification always uses the parameters embedded in the stored hash.
#[derive(Debug, Clone, Copy)]
pub struct PasswordCost(Params);

impl PasswordCost {
    pub fn new(log_n: u8) -> anyhow::Result<Self> {
        let params = Params::new(
            log_n,
            Params::RECOMMENDED_R,
            Params::RECOMMENDED_P,
            Params::RECOMMENDED_LEN,
        )
        .map_err(|e| anyhow::anyhow!("invalid scrypt cost {log_n}: {e}"))?;
        Ok(Self(params))
    }
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self(Params::recommended())
    }
}

/// Hash a password using scrypt with the default cost
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    hash_password_with_cost(plain, PasswordCost::default())
}

/// Hash a password using scrypt with an explicit cost
pub fn hash_password_with_cost(plain: &str, cost: PasswordCost) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Scrypt
        .hash_password_customized(plain.as_bytes(), None, None, cost.0, &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?
        .to_string();
    Ok(hash)
}

/// Verify a presented password against a stored hash.
///
/// Malformed hashes verify as `false`; the digest comparison is constant time.
pub fn verify_password(presented: &str, stored_hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(stored_hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Scrypt.verify_password(presented.as_bytes(), &parsed_hash).is_ok()
}

/// Verify a password and wipe the presented copy afterwards
pub fn verify_password_secure(presented: &mut String, stored_hash: &str) -> bool {
    let ok = verify_password(presented, stored_hash);
    presented.zeroize();
    ok
}
