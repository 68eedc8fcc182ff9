//! Captcha Router

use crate::application::config::CaptchaConfig;
use crate::domain::repository::{ChallengeRepository, IssueQuota};
use crate::infra::postgres::PgCaptchaRepository;
use crate::presentation::handlers::{self, CaptchaAppState};
use axum::{
    Router,
    routing::{get, post},
};

/// Create the captcha router with PostgreSQL repository
pub fn captcha_router(repo: PgCaptchaRepository, config: CaptchaConfig) -> Router {
    captcha_router_with_state(CaptchaAppState::new(repo, config))
}

/// Create a captcha router for any repository implementation
pub fn captcha_router_generic<R>(repo: R, config: CaptchaConfig) -> Router
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    captcha_router_with_state(CaptchaAppState::new(repo, config))
}

/// Create a captcha router around existing state
pub fn captcha_router_with_state<R>(state: CaptchaAppState<R>) -> Router
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    Router::new()
        .route(
            "/",
            get(handlers::issue_captcha::<R>).post(handlers::issue_captcha::<R>),
        )
        .route("/verify", post(handlers::verify_captcha::<R>))
        .with_state(state)
}
