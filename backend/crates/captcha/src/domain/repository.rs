//! Repository Traits
//!
//! Interfaces for data persistence. Implementations are in the infra layer.
//!
//! Every state transition is a single conditioned write whose predicate
//! carries the full precondition set. Implementations report the number of
//! rows affected; callers treat anything other than 1 as a lost race.

use crate::domain::entities::Challenge;
use crate::domain::value_objects::RejectReason;
use crate::error::CaptchaResult;
use chrono::{DateTime, Utc};
use platform::client::ClientFingerprint;
use platform::rate_limit::{RateLimitConfig, RateLimitDecision};
use std::net::IpAddr;
use uuid::Uuid;

/// Predicate for redeeming a verification token
#[derive(Debug, Clone)]
pub struct Redemption<'a> {
    pub captcha_id: Uuid,
    /// Must equal the fingerprint captured at issuance
    pub fingerprint: &'a ClientFingerprint,
    /// HMAC of the presented token
    pub token_hash: [u8; 32],
}

/// Predicate for the cleanup sweep
///
/// A row is stale if any of these hold: consumed; primary or token expiry
/// before `expired_before`; created before `created_before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleCutoffs {
    pub expired_before: DateTime<Utc>,
    pub created_before: DateTime<Utc>,
}

/// Attempt counter as left by a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCount {
    pub failed_attempts: u16,
    pub max_attempts: u16,
}

impl FailureCount {
    /// The failure exhausted the budget and hard-locked the challenge
    pub fn locked(&self) -> bool {
        self.failed_attempts >= self.max_attempts
    }
}

/// Challenge repository trait
#[trait_variant::make(ChallengeRepository: Send)]
pub trait LocalChallengeRepository {
    /// Insert a freshly issued challenge
    async fn insert(&self, challenge: &Challenge) -> CaptchaResult<()>;

    /// Point read by id
    async fn find_by_id(&self, id: Uuid) -> CaptchaResult<Option<Challenge>>;

    /// Count one failed attempt
    ///
    /// Guard: `consumed_at IS NULL AND verified_at IS NULL AND
    /// failed_attempts < max_attempts AND expires_at > now`.
    /// Increments `failed_attempts`, records `reason`, and collapses
    /// `expires_at` to `now` when the increment reaches `max_attempts`.
    /// Returns the counter after the write, or `None` when the guard failed.
    async fn record_failure(
        &self,
        id: Uuid,
        reason: RejectReason,
        now: DateTime<Utc>,
    ) -> CaptchaResult<Option<FailureCount>>;

    /// Set the verification fields
    ///
    /// Guard: `consumed_at IS NULL AND verified_at IS NULL AND
    /// failed_attempts < max_attempts AND expires_at > now`.
    /// Also clears `last_error_code`.
    async fn mark_verified(
        &self,
        id: Uuid,
        token_hash: &[u8; 32],
        token_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CaptchaResult<u64>;

    /// Redeem a verified challenge
    ///
    /// Guard: id, ip and UA hash match; token hash matches;
    /// `verified_at IS NOT NULL`; `verify_token_expires_at > now`;
    /// `consumed_at IS NULL`; `expires_at > now`.
    /// Sets `consumed_at` and `expires_at` to `now`.
    async fn consume(&self, redemption: &Redemption<'_>, now: DateTime<Utc>) -> CaptchaResult<u64>;

    /// Delete up to `limit` stale rows
    async fn delete_stale(&self, cutoffs: &StaleCutoffs, limit: u32) -> CaptchaResult<u64>;
}

/// Per-IP issuance quota
#[trait_variant::make(IssueQuota: Send)]
pub trait LocalIssueQuota {
    /// Sliding-window check of challenges issued to `ip`
    async fn check(
        &self,
        ip: IpAddr,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> CaptchaResult<RateLimitDecision>;
}
