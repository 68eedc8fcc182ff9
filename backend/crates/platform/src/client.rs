//! Client identification utilities
//!
//! Common functions for identifying clients via HTTP headers.

use axum::http::{HeaderMap, header};
use std::net::IpAddr;

use crate::crypto::{constant_time_eq, sha256};

/// User-Agent strings are truncated to this many characters before hashing
pub const MAX_USER_AGENT_CHARS: usize = 300;

/// Placeholder used when the client sends no User-Agent
pub const UNKNOWN_USER_AGENT: &str = "unknown";

/// Client fingerprint
///
/// Binds a server-side record to the client that created it.
/// The raw User-Agent is never kept, only its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFingerprint {
    /// Client IP address (from X-Forwarded-For or direct connection)
    pub ip: IpAddr,
    /// SHA-256 of the normalized User-Agent
    pub user_agent_hash: [u8; 32],
}

impl ClientFingerprint {
    /// Build a fingerprint from an IP and an optional raw User-Agent
    pub fn new(ip: IpAddr, user_agent: Option<&str>) -> Self {
        Self {
            ip,
            user_agent_hash: hash_user_agent(user_agent),
        }
    }

    /// Compare against stored fingerprint parts
    pub fn matches(&self, ip: IpAddr, user_agent_hash: &[u8]) -> bool {
        // Evaluate both sides so the hash comparison always runs
        let ip_ok = self.ip == ip;
        let ua_ok = constant_time_eq(&self.user_agent_hash, user_agent_hash);
        ip_ok & ua_ok
    }
}

/// Normalize a User-Agent: missing or empty becomes `"unknown"`,
/// anything longer than [`MAX_USER_AGENT_CHARS`] is truncated.
pub fn normalize_user_agent(user_agent: Option<&str>) -> String {
    match user_agent {
        Some(ua) if !ua.is_empty() => ua.chars().take(MAX_USER_AGENT_CHARS).collect(),
        _ => UNKNOWN_USER_AGENT.to_string(),
    }
}

/// One-way hash of the normalized User-Agent
pub fn hash_user_agent(user_agent: Option<&str>) -> [u8; 32] {
    sha256(normalize_user_agent(user_agent).as_bytes())
}

/// Read the User-Agent header, if present and valid ASCII
pub fn extract_user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
}

/// Extract client fingerprint from request headers
///
/// ## Arguments
/// * `headers` - HTTP request headers
/// * `client_ip` - Client IP address (see [`extract_client_ip`])
pub fn extract_fingerprint(headers: &HeaderMap, client_ip: IpAddr) -> ClientFingerprint {
    ClientFingerprint::new(client_ip, extract_user_agent(headers))
}

/// Extract client IP address from headers
///
/// Checks X-Forwarded-For header first (for reverse proxy setups),
/// then falls back to direct connection IP.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: IpAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or(direct_ip)
}
