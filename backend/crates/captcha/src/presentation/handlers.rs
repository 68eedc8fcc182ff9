//! HTTP Handlers

use crate::application::cleanup::CleanupSweeper;
use crate::application::config::CaptchaConfig;
use crate::application::issue_challenge::{IssueCaptchaUseCase, IssueOutcome};
use crate::application::verify_captcha::{VerifyCaptchaInput, VerifyCaptchaUseCase, VerifyOutcome};
use crate::domain::repository::{ChallengeRepository, IssueQuota};
use crate::error::CaptchaResult;
use crate::presentation::dto::{IssueResponse, ThrottledResponse, VerifyRequest, VerifyResponse};
use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use platform::client::{extract_client_ip, extract_fingerprint};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Shared state for captcha handlers
pub struct CaptchaAppState<R>
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    pub repo: Arc<R>,
    pub config: Arc<CaptchaConfig>,
    pub sweeper: CleanupSweeper<R>,
}

impl<R> Clone for CaptchaAppState<R>
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            config: Arc::clone(&self.config),
            sweeper: self.sweeper.clone(),
        }
    }
}

impl<R> CaptchaAppState<R>
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    pub fn new(repo: R, config: CaptchaConfig) -> Self {
        let repo = Arc::new(repo);
        let sweeper = CleanupSweeper::new(Arc::clone(&repo), config.sweeper.clone());
        Self {
            repo,
            config: Arc::new(config),
            sweeper,
        }
    }
}

/// GET|POST /api/auth/captcha
pub async fn issue_captcha<R>(
    State(state): State<CaptchaAppState<R>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> CaptchaResult<Response>
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    let client_ip = extract_client_ip(&headers, addr.ip());
    let fingerprint = extract_fingerprint(&headers, client_ip);

    let use_case = IssueCaptchaUseCase::new(
        state.repo.clone(),
        state.repo.clone(),
        state.sweeper.clone(),
        state.config.clone(),
    );

    let response = match use_case.execute(&fingerprint).await? {
        IssueOutcome::Issued {
            captcha_id,
            expires_at,
        } => Json(IssueResponse {
            captcha_id,
            expires_at: expires_at.timestamp_millis(),
        })
        .into_response(),
        IssueOutcome::Throttled { retry_after } => {
            let retry_after = retry_after_secs(retry_after);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(ThrottledResponse {
                    error: "Too many requests, please try again later",
                    retry_after,
                }),
            )
                .into_response()
        }
    };

    Ok(response)
}

/// POST /api/auth/captcha/verify
pub async fn verify_captcha<R>(
    State(state): State<CaptchaAppState<R>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<VerifyRequest>,
) -> CaptchaResult<Json<VerifyResponse>>
where
    R: ChallengeRepository + IssueQuota + Sync + 'static,
{
    let client_ip = extract_client_ip(&headers, addr.ip());
    let fingerprint = extract_fingerprint(&headers, client_ip);

    let use_case =
        VerifyCaptchaUseCase::new(state.repo.clone(), state.sweeper.clone(), state.config.clone());

    let (captcha_id, payload) = req.into_parts();
    let outcome = use_case
        .execute(VerifyCaptchaInput { captcha_id, payload }, &fingerprint)
        .await?;

    let response = match outcome {
        VerifyOutcome::Verified { token, .. } => VerifyResponse {
            valid: true,
            verification_token: Some(token.into_inner()),
            refresh_captcha: None,
            error: None,
        },
        rejected => VerifyResponse {
            valid: false,
            verification_token: None,
            refresh_captcha: Some(rejected.refresh_captcha()),
            error: rejected.error_message(),
        },
    };

    Ok(Json(response))
}

/// Whole seconds, rounded up
fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}
