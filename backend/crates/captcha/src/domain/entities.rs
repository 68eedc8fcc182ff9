//! Domain Entities
//!
//! Core business entities for the slider captcha domain.

use chrono::{DateTime, TimeDelta, Utc};
use platform::client::ClientFingerprint;
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::value_objects::RejectReason;

/// Challenge entity - one captcha attempt's full lifecycle
///
/// Verification fields are set together, once. After `consumed_at` is set
/// the row only ever leaves through deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub id: Uuid,
    pub ip_address: IpAddr,
    pub user_agent_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Only moves earlier (hard lock, consumption)
    pub expires_at: DateTime<Utc>,
    pub failed_attempts: u16,
    pub max_attempts: u16,
    pub last_error_code: Option<RejectReason>,
    pub verified_at: Option<DateTime<Utc>>,
    /// HMAC of the one-time token, never the token itself
    pub verify_token_hash: Option<Vec<u8>>,
    pub verify_token_expires_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Create a new challenge bound to `fingerprint`
    pub fn issue(
        fingerprint: &ClientFingerprint,
        max_attempts: u16,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip_address: fingerprint.ip,
            user_agent_hash: fingerprint.user_agent_hash.to_vec(),
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            failed_attempts: 0,
            max_attempts,
            last_error_code: None,
            verified_at: None,
            verify_token_hash: None,
            verify_token_expires_at: None,
            consumed_at: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_locked(&self) -> bool {
        self.failed_attempts >= self.max_attempts
    }
}
