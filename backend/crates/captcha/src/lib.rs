//! Slider Captcha Backend Module
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, trajectory validator, repository traits
//! - `application/` - Use cases, configuration, cleanup sweeper
//! - `infra/` - PostgreSQL and in-memory repositories
//! - `presentation/` - HTTP handlers
//!
//! ## Security Model
//! - A challenge is bound to the (IP, hashed User-Agent) that requested it
//! - Every state transition is a single conditioned write; the affected-row
//!   count decides the winner, so a challenge verifies and redeems at most once
//! - The verification token is returned once and only its HMAC is stored
//! - Failed attempts are budgeted; exhausting the budget hard-locks the challenge

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::cleanup::{CleanupSweeper, SweepTrigger};
pub use application::config::{CaptchaConfig, ConfigError, Profile, SweeperConfig};
pub use application::consume_token::ConsumeTokenUseCase;
pub use application::issue_challenge::{IssueCaptchaUseCase, IssueOutcome};
pub use application::verify_captcha::{
    VerifyCaptchaInput, VerifyCaptchaUseCase, VerifyFailure, VerifyOutcome,
};
pub use domain::trajectory::{RiskPolicy, RiskWeights, TrajectoryVerdict, validate_trajectory};
pub use domain::value_objects::{RejectReason, SliderPayload, TrackPoint, VerificationToken};
pub use error::{CaptchaError, CaptchaResult};
pub use infra::memory::InMemoryCaptchaRepository;
pub use infra::postgres::PgCaptchaRepository;
pub use presentation::router::captcha_router;

#[cfg(test)]
mod tests;
