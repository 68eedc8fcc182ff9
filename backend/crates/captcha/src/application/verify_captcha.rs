//! Verify Captcha Use Case
//!
//! Checks run in a fixed order and the first failing one decides the
//! outcome. Every write is a conditioned update; a write that affects no
//! row means another request got there first.

use chrono::{DateTime, Utc};
use platform::client::ClientFingerprint;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::cleanup::CleanupSweeper;
use crate::application::config::CaptchaConfig;
use crate::domain::entities::Challenge;
use crate::domain::repository::ChallengeRepository;
use crate::domain::services::{hash_token, mint_token};
use crate::domain::trajectory::{TrajectoryVerdict, validate_trajectory};
use crate::domain::value_objects::{RejectReason, SliderPayload, VerificationToken};
use crate::error::CaptchaResult;

/// Input DTO for verify
#[derive(Debug, Clone)]
pub struct VerifyCaptchaInput {
    /// Raw id as sent by the client
    pub captcha_id: String,
    pub payload: SliderPayload,
}

/// Why a verification was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    NotFound,
    Consumed,
    Expired,
    Locked,
    /// Different client than the one the challenge was issued to
    Fingerprint,
    Trajectory(RejectReason),
    /// Lost a conditioned write
    StateChanged,
}

impl VerifyFailure {
    /// Opaque message safe to show the client
    pub fn message(&self) -> &'static str {
        match self {
            VerifyFailure::NotFound => "Captcha is invalid or expired",
            VerifyFailure::Consumed => "Captcha already used, please refresh",
            VerifyFailure::Expired => "Captcha expired, please refresh",
            VerifyFailure::Locked => "Too many failed attempts, please refresh",
            VerifyFailure::Fingerprint => "Captcha check failed, please refresh",
            VerifyFailure::Trajectory(_) => "Slider verification failed, please try again",
            VerifyFailure::StateChanged => "Captcha state changed, please refresh",
        }
    }
}

/// Output of verify
#[derive(Debug)]
pub enum VerifyOutcome {
    Verified {
        /// Handed out once; only its HMAC is stored
        token: VerificationToken,
        token_expires_at: DateTime<Utc>,
    },
    Rejected {
        failure: VerifyFailure,
        /// The challenge is dead; the client must fetch a new one
        refresh_captcha: bool,
    },
}

impl VerifyOutcome {
    fn rejected(failure: VerifyFailure, refresh_captcha: bool) -> Self {
        VerifyOutcome::Rejected {
            failure,
            refresh_captcha,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Verified { .. })
    }

    pub fn refresh_captcha(&self) -> bool {
        match self {
            VerifyOutcome::Verified { .. } => false,
            VerifyOutcome::Rejected {
                refresh_captcha, ..
            } => *refresh_captcha,
        }
    }

    pub fn error_message(&self) -> Option<&'static str> {
        match self {
            VerifyOutcome::Verified { .. } => None,
            VerifyOutcome::Rejected { failure, .. } => Some(failure.message()),
        }
    }

    pub fn failure(&self) -> Option<VerifyFailure> {
        match self {
            VerifyOutcome::Verified { .. } => None,
            VerifyOutcome::Rejected { failure, .. } => Some(*failure),
        }
    }
}

/// Verify Captcha Use Case
pub struct VerifyCaptchaUseCase<C>
where
    C: ChallengeRepository + Sync + 'static,
{
    challenge_repo: Arc<C>,
    sweeper: CleanupSweeper<C>,
    config: Arc<CaptchaConfig>,
}

impl<C> VerifyCaptchaUseCase<C>
where
    C: ChallengeRepository + Sync + 'static,
{
    pub fn new(
        challenge_repo: Arc<C>,
        sweeper: CleanupSweeper<C>,
        config: Arc<CaptchaConfig>,
    ) -> Self {
        Self {
            challenge_repo,
            sweeper,
            config,
        }
    }

    pub async fn execute(
        &self,
        input: VerifyCaptchaInput,
        fingerprint: &ClientFingerprint,
    ) -> CaptchaResult<VerifyOutcome> {
        self.sweeper.trigger();

        let Ok(captcha_id) = Uuid::parse_str(input.captcha_id.trim()) else {
            return Ok(VerifyOutcome::rejected(VerifyFailure::NotFound, true));
        };

        let Some(challenge) = self.challenge_repo.find_by_id(captcha_id).await? else {
            return Ok(VerifyOutcome::rejected(VerifyFailure::NotFound, true));
        };

        let now = Utc::now();
        if challenge.is_consumed() {
            tracing::warn!(captcha_id = %captcha_id, "Replay of consumed captcha");
            return Ok(VerifyOutcome::rejected(VerifyFailure::Consumed, true));
        }
        if challenge.is_expired(now) {
            return Ok(VerifyOutcome::rejected(VerifyFailure::Expired, true));
        }
        if challenge.is_locked() {
            return Ok(VerifyOutcome::rejected(VerifyFailure::Locked, true));
        }

        if !fingerprint.matches(challenge.ip_address, &challenge.user_agent_hash) {
            return self
                .fail(
                    &challenge,
                    VerifyFailure::Fingerprint,
                    RejectReason::FingerprintMismatch,
                    now,
                )
                .await;
        }

        match validate_trajectory(&input.payload, &self.config.risk_policy) {
            TrajectoryVerdict::Accepted { risk_score } => {
                tracing::debug!(captcha_id = %captcha_id, risk_score, "Trajectory accepted");
            }
            TrajectoryVerdict::Rejected(reason) => {
                return self
                    .fail(&challenge, VerifyFailure::Trajectory(reason), reason, now)
                    .await;
            }
        }

        let token = mint_token();
        let token_hash = hash_token(&self.config.token_secret, token.expose());
        // Fresh clock for the write; the read-time one may predate a lock
        let verified_at = Utc::now();
        let token_expires_at = verified_at
            .checked_add_signed(self.config.verify_token_ttl())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let affected = self
            .challenge_repo
            .mark_verified(captcha_id, &token_hash, token_expires_at, verified_at)
            .await?;

        if affected != 1 {
            tracing::warn!(captcha_id = %captcha_id, "Lost verification race");
            return Ok(VerifyOutcome::rejected(VerifyFailure::StateChanged, true));
        }

        tracing::info!(captcha_id = %captcha_id, "Captcha verified");

        Ok(VerifyOutcome::Verified {
            token,
            token_expires_at,
        })
    }

    /// Count a failed attempt; refresh only when it exhausts the budget
    async fn fail(
        &self,
        challenge: &Challenge,
        failure: VerifyFailure,
        reason: RejectReason,
        now: DateTime<Utc>,
    ) -> CaptchaResult<VerifyOutcome> {
        let Some(count) = self
            .challenge_repo
            .record_failure(challenge.id, reason, now)
            .await?
        else {
            tracing::warn!(captcha_id = %challenge.id, "Lost failure-count race");
            return Ok(VerifyOutcome::rejected(VerifyFailure::StateChanged, true));
        };

        // Decided by the stored counter, which concurrent failures also moved
        let locked = count.locked();
        tracing::warn!(
            captcha_id = %challenge.id,
            reason = %reason,
            attempts = count.failed_attempts,
            locked,
            "Captcha attempt rejected"
        );

        Ok(VerifyOutcome::rejected(failure, locked))
    }
}
