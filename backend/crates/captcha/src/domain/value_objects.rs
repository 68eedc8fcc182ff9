//! Domain Value Objects
//!
//! Immutable value types for the slider captcha domain.

use serde::Serialize;
use std::fmt;

/// One sample of a drag gesture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    /// Horizontal offset of the slider handle in px, 0 = left edge
    pub position: f64,
    /// Client clock in ms
    pub timestamp: f64,
}

impl TrackPoint {
    pub fn new(position: f64, timestamp: f64) -> Self {
        Self {
            position,
            timestamp,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.timestamp.is_finite()
    }
}

/// A submitted drag gesture plus the geometry it was performed on
#[derive(Debug, Clone, PartialEq)]
pub struct SliderPayload {
    pub trajectory: Vec<TrackPoint>,
    /// Client clock (ms) when the pointer went down
    pub start_time: f64,
    /// Final handle position as reported by the client, 0..=100
    pub position_percent: f64,
    pub container_width: f64,
    pub slider_width: f64,
}

impl SliderPayload {
    /// Rightmost reachable handle offset
    pub fn max_position(&self) -> f64 {
        self.container_width - self.slider_width
    }
}

/// Why an attempt was rejected
///
/// Codes are persisted in `last_error_code` and emitted in logs; they are
/// never shown to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidTrajectoryLength,
    InvalidStartTime,
    InvalidPositionPercent,
    InvalidContainerWidth,
    InvalidSliderWidth,
    InvalidFirstPoint,
    InvalidLastPoint,
    InvalidStartAnchor,
    InvalidPointShape,
    PositionOutOfRange,
    NonIncreasingTimestamp,
    SpeedTooFast,
    AbnormalJump,
    AbnormalDuration,
    InsufficientProgress,
    PositionNotReached,
    PositionMismatch,
    /// Aggregate risk score over threshold. Deliberately says nothing about
    /// which signals fired.
    TrajectoryRiskHigh,
    FingerprintMismatch,
}

impl RejectReason {
    pub const ALL: [RejectReason; 19] = [
        Self::InvalidTrajectoryLength,
        Self::InvalidStartTime,
        Self::InvalidPositionPercent,
        Self::InvalidContainerWidth,
        Self::InvalidSliderWidth,
        Self::InvalidFirstPoint,
        Self::InvalidLastPoint,
        Self::InvalidStartAnchor,
        Self::InvalidPointShape,
        Self::PositionOutOfRange,
        Self::NonIncreasingTimestamp,
        Self::SpeedTooFast,
        Self::AbnormalJump,
        Self::AbnormalDuration,
        Self::InsufficientProgress,
        Self::PositionNotReached,
        Self::PositionMismatch,
        Self::TrajectoryRiskHigh,
        Self::FingerprintMismatch,
    ];

    /// Stable string code for storage and telemetry
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTrajectoryLength => "invalid_trajectory_length",
            Self::InvalidStartTime => "invalid_start_time",
            Self::InvalidPositionPercent => "invalid_position_percent",
            Self::InvalidContainerWidth => "invalid_container_width",
            Self::InvalidSliderWidth => "invalid_slider_width",
            Self::InvalidFirstPoint => "invalid_first_point",
            Self::InvalidLastPoint => "invalid_last_point",
            Self::InvalidStartAnchor => "invalid_start_anchor",
            Self::InvalidPointShape => "invalid_point_shape",
            Self::PositionOutOfRange => "position_out_of_range",
            Self::NonIncreasingTimestamp => "non_increasing_timestamp",
            Self::SpeedTooFast => "speed_too_fast",
            Self::AbnormalJump => "abnormal_jump",
            Self::AbnormalDuration => "abnormal_duration",
            Self::InsufficientProgress => "insufficient_progress",
            Self::PositionNotReached => "position_not_reached",
            Self::PositionMismatch => "position_mismatch",
            Self::TrajectoryRiskHigh => "trajectory_risk_high",
            Self::FingerprintMismatch => "fingerprint_mismatch",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.code() == code)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Plaintext one-time verification token
///
/// Handed to the client exactly once. Only its HMAC is ever stored, and
/// `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationToken(String);

impl VerificationToken {
    pub(crate) fn new(token: String) -> Self {
        Self(token)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerificationToken(***)")
    }
}
