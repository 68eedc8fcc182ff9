//! Application Layer - Use Cases
//!
//! This layer orchestrates domain logic and infrastructure.
//! Contains use case implementations.

pub mod cleanup;
pub mod config;
pub mod consume_token;
pub mod issue_challenge;
pub mod verify_captcha;
