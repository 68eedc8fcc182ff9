//! Domain Services
//!
//! Pure domain logic for one-time verification tokens.

use platform::crypto::{SecretKey, hmac_sha256, random_token};

use crate::domain::value_objects::VerificationToken;

/// Entropy of a verification token in bytes
pub const TOKEN_ENTROPY_BYTES: usize = 24;

/// Generate a fresh one-time verification token
pub fn mint_token() -> VerificationToken {
    VerificationToken::new(random_token(TOKEN_ENTROPY_BYTES))
}

/// The only form of a token that may be persisted
pub fn hash_token(secret: &SecretKey, token: &str) -> [u8; 32] {
    hmac_sha256(secret, token.as_bytes())
}
