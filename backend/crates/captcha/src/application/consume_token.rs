//! Consume Token Use Case

use chrono::Utc;
use platform::client::ClientFingerprint;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::cleanup::CleanupSweeper;
use crate::application::config::CaptchaConfig;
use crate::domain::repository::{ChallengeRepository, Redemption};
use crate::domain::services::hash_token;
use crate::error::CaptchaResult;

/// Consume Token Use Case
///
/// Redeems a verification token exactly once. `false` always means the
/// caller has to verify again; there is no partial success.
pub struct ConsumeTokenUseCase<C>
where
    C: ChallengeRepository + Sync + 'static,
{
    challenge_repo: Arc<C>,
    sweeper: CleanupSweeper<C>,
    config: Arc<CaptchaConfig>,
}

impl<C> ConsumeTokenUseCase<C>
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
        captcha_id: &str,
        token: &str,
        fingerprint: &ClientFingerprint,
    ) -> CaptchaResult<bool> {
        self.sweeper.trigger();

        if captcha_id.is_empty() || token.is_empty() {
            return Ok(false);
        }
        let Ok(captcha_id) = Uuid::parse_str(captcha_id) else {
            return Ok(false);
        };

        let redemption = Redemption {
            captcha_id,
            fingerprint,
            token_hash: hash_token(&self.config.token_secret, token),
        };

        let affected = self
            .challenge_repo
            .consume(&redemption, Utc::now())
            .await?;

        if affected != 1 {
            tracing::warn!(captcha_id = %captcha_id, "Captcha token rejected");
            return Ok(false);
        }

        tracing::info!(captcha_id = %captcha_id, "Captcha token consumed");
        self.sweeper.trigger_forced();

        Ok(true)
    }
}
