//! Application Configuration
//!
//! Configuration for the captcha application layer.

use chrono::TimeDelta;
use platform::crypto::{SecretKey, SecretKeyError};
use platform::rate_limit::RateLimitConfig;
use std::env;
use std::time::Duration;

use crate::domain::trajectory::RiskPolicy;

/// Environment variable holding the HMAC secret
pub const SECRET_ENV: &str = "CAPTCHA_SECRET_KEY";

/// Environment variable selecting the [`Profile`]
pub const PROFILE_ENV: &str = "APP_PROFILE";

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Production,
    Development,
}

impl Profile {
    /// Anything that is not explicitly development is production
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Profile::Development,
            _ => Profile::Production,
        }
    }

    pub fn from_env() -> Self {
        env::var(PROFILE_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or(Profile::Production)
    }
}

/// Error while loading configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("CAPTCHA_SECRET_KEY must be set in production")]
    MissingSecret,

    #[error("CAPTCHA_SECRET_KEY is unusable: {0}")]
    InvalidSecret(#[from] SecretKeyError),
}

/// Cleanup sweeper configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Minimum time between two sweeps
    pub cooldown: Duration,
    /// Maximum rows deleted per sweep
    pub batch_limit: u32,
    /// Expired rows are kept this long past expiry
    pub expired_grace: Duration,
    /// Rows older than this are deleted regardless of state
    pub retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(90),
            batch_limit: 400,
            expired_grace: Duration::from_secs(120),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Captcha application configuration
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Challenge TTL
    pub challenge_ttl: Duration,
    /// Verification token TTL
    pub verify_token_ttl: Duration,
    /// Failed attempts before a challenge locks
    pub max_attempts: u16,
    /// Per-IP issuance quota
    pub issue_limit: RateLimitConfig,
    pub sweeper: SweeperConfig,
    pub risk_policy: RiskPolicy,
    /// HMAC key for verification tokens
    pub token_secret: SecretKey,
}

impl CaptchaConfig {
    /// Default tunables around an explicit secret
    pub fn with_secret(token_secret: SecretKey) -> Self {
        Self {
            challenge_ttl: Duration::from_secs(5 * 60),
            verify_token_ttl: Duration::from_secs(2 * 60),
            max_attempts: 5,
            issue_limit: RateLimitConfig::default(),
            sweeper: SweeperConfig::default(),
            risk_policy: RiskPolicy::default(),
            token_secret,
        }
    }

    /// Build the config for `profile` from a raw secret
    ///
    /// Production requires a secret of at least [`SecretKey::MIN_LEN`] bytes.
    /// Development falls back to a random per-process secret.
    pub fn load(profile: Profile, raw_secret: Option<String>) -> Result<Self, ConfigError> {
        let raw_secret = raw_secret
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let token_secret = match profile {
            Profile::Production => {
                let raw = raw_secret.ok_or(ConfigError::MissingSecret)?;
                SecretKey::new(raw.into_bytes())?
            }
            Profile::Development => match raw_secret.map(|raw| SecretKey::new(raw.into_bytes())) {
                Some(Ok(secret)) => secret,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Ignoring short captcha secret in development");
                    SecretKey::generate()
                }
                None => {
                    tracing::warn!("No captcha secret set, using a random development secret");
                    SecretKey::generate()
                }
            },
        };

        Ok(Self::with_secret(token_secret))
    }

    /// Load from `APP_PROFILE` and `CAPTCHA_SECRET_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Profile::from_env(), env::var(SECRET_ENV).ok())
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::with_secret(SecretKey::generate())
    }

    pub fn challenge_ttl(&self) -> TimeDelta {
        to_delta(self.challenge_ttl)
    }

    pub fn verify_token_ttl(&self) -> TimeDelta {
        to_delta(self.verify_token_ttl)
    }
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
