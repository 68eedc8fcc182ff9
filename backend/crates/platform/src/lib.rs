//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Cryptographic utilities (SHA-256, HMAC, secret keys, random tokens)
//! - Client identification (IP + hashed User-Agent fingerprint)
//! - Rate limiting primitives

pub mod client;
pub mod crypto;
pub mod rate_limit;
