//! Cryptographic Utilities

use std::fmt;

use base64::{Engine, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Generate cryptographically secure random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a URL-safe random token from `len` bytes of entropy
pub fn random_token(len: usize) -> String {
    let mut bytes = random_bytes(len);
    let token = to_base64_url(&bytes);
    bytes.zeroize();
    token
}

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode bytes as unpadded URL-safe base64
pub fn to_base64_url(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Error when building a [`SecretKey`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretKeyError {
    #[error("secret key too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },
}

/// HMAC signing key
///
/// Zeroized on drop and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Minimum accepted key length in bytes
    pub const MIN_LEN: usize = 32;

    /// Wrap key material, rejecting anything shorter than [`Self::MIN_LEN`]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, SecretKeyError> {
        let mut bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(SecretKeyError::TooShort {
                len,
                min: Self::MIN_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Generate a random key (process-local, not persisted anywhere)
    pub fn generate() -> Self {
        Self(random_bytes(Self::MIN_LEN))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Compute HMAC-SHA256
pub fn hmac_sha256(key: &SecretKey, data: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
