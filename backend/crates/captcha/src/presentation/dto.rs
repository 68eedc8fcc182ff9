//! API DTOs (Data Transfer Objects)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{SliderPayload, TrackPoint};

/// Response for GET|POST /api/auth/captcha
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueResponse {
    pub captcha_id: Uuid,
    /// Unix millis
    pub expires_at: i64,
}

/// 429 body for GET|POST /api/auth/captcha
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottledResponse {
    pub error: &'static str,
    /// Seconds
    pub retry_after: u64,
}

/// One sample as sent by the browser
///
/// Missing coordinates become NaN and fail the shape checks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackPointDto {
    pub position: Option<f64>,
    pub timestamp: Option<f64>,
}

/// Request for POST /api/auth/captcha/verify
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifyRequest {
    pub captcha_id: String,
    pub position_percent: Option<f64>,
    pub trajectory: Vec<TrackPointDto>,
    pub start_time: Option<f64>,
    pub container_width: Option<f64>,
    pub slider_width: Option<f64>,
}

impl VerifyRequest {
    pub fn into_parts(self) -> (String, SliderPayload) {
        let number = |v: Option<f64>| v.unwrap_or(f64::NAN);
        let payload = SliderPayload {
            trajectory: self
                .trajectory
                .into_iter()
                .map(|p| TrackPoint::new(number(p.position), number(p.timestamp)))
                .collect(),
            start_time: number(self.start_time),
            position_percent: number(self.position_percent),
            container_width: number(self.container_width),
            slider_width: number(self.slider_width),
        };
        (self.captcha_id, payload)
    }
}

/// Response for POST /api/auth/captcha/verify
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_captcha: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}
