//! Issue Captcha Use Case

use chrono::{DateTime, Utc};
use platform::client::ClientFingerprint;
use platform::rate_limit::RateLimitDecision;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::application::cleanup::CleanupSweeper;
use crate::application::config::CaptchaConfig;
use crate::domain::entities::Challenge;
use crate::domain::repository::{ChallengeRepository, IssueQuota};
use crate::error::CaptchaResult;

/// Output of issuing a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued {
        captcha_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    /// Per-IP quota exhausted, no row was created
    Throttled { retry_after: Duration },
}

/// Issue Captcha Use Case
pub struct IssueCaptchaUseCase<C, Q>
where
    C: ChallengeRepository + Sync + 'static,
    Q: IssueQuota,
{
    challenge_repo: Arc<C>,
    quota: Arc<Q>,
    sweeper: CleanupSweeper<C>,
    config: Arc<CaptchaConfig>,
}

impl<C, Q> IssueCaptchaUseCase<C, Q>
where
    C: ChallengeRepository + Sync + 'static,
    Q: IssueQuota,
{
    pub fn new(
        challenge_repo: Arc<C>,
        quota: Arc<Q>,
        sweeper: CleanupSweeper<C>,
        config: Arc<CaptchaConfig>,
    ) -> Self {
        Self {
            challenge_repo,
            quota,
            sweeper,
            config,
        }
    }

    pub async fn execute(&self, fingerprint: &ClientFingerprint) -> CaptchaResult<IssueOutcome> {
        self.sweeper.trigger();

        let now = Utc::now();
        let decision = self
            .quota
            .check(fingerprint.ip, &self.config.issue_limit, now)
            .await?;

        if let RateLimitDecision::Deny { retry_after } = decision {
            tracing::warn!(
                ip = %fingerprint.ip,
                retry_after_secs = retry_after.as_secs(),
                "Captcha issuance throttled"
            );
            return Ok(IssueOutcome::Throttled { retry_after });
        }

        let challenge = Challenge::issue(
            fingerprint,
            self.config.max_attempts,
            self.config.challenge_ttl(),
            now,
        );
        self.challenge_repo.insert(&challenge).await?;

        tracing::info!(captcha_id = %challenge.id, "Issued captcha");

        Ok(IssueOutcome::Issued {
            captcha_id: challenge.id,
            expires_at: challenge.expires_at,
        })
    }
}
