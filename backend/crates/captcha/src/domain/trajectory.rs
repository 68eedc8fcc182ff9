//! Trajectory Validator
//!
//! Pure scoring of one slider drag. Two stages:
//!
//! 1. Structural checks. Any violation is an immediate rejection with a
//!    specific [`RejectReason`].
//! 2. Risk scoring. Soft behavioral signals add weight to a score; above the
//!    policy threshold the drag is rejected as [`RejectReason::TrajectoryRiskHigh`].

use std::collections::HashSet;

use crate::domain::value_objects::{RejectReason, SliderPayload, TrackPoint};

const MIN_SAMPLES: usize = 4;
const MAX_SAMPLES: usize = 600;
const MIN_CONTAINER_WIDTH: f64 = 180.0;
const MAX_CONTAINER_WIDTH: f64 = 1200.0;
const MIN_SLIDER_WIDTH: f64 = 36.0;
const MAX_SLIDER_WIDTH: f64 = 120.0;
/// Slider must leave at least this much track inside the container
const MIN_TRACK_MARGIN: f64 = 20.0;
/// Samples may overshoot either end of the track by this much
const POSITION_TOLERANCE: f64 = 4.0;
/// First sample must arrive within this many ms of the declared start
const MAX_START_ANCHOR_MS: f64 = 1500.0;
/// Largest single step, as a fraction of the track
const MAX_JUMP_RATIO: f64 = 0.55;
const MIN_DURATION_MS: f64 = 320.0;
const MAX_DURATION_MS: f64 = 20_000.0;
const MIN_PROGRESS_RATIO: f64 = 0.85;
const MIN_END_PERCENT: f64 = 96.0;
const MAX_PERCENT_DRIFT: f64 = 7.0;
/// Segments shorter than this are too noisy for speed measurement
const MIN_SPEED_SEGMENT_MS: f64 = 8.0;
/// px/ms, anything faster is rejected outright
const HARD_SPEED_LIMIT: f64 = 4.5;

const TIME_BUCKET_MS: f64 = 8.0;
const MAX_TIME_BUCKET: i64 = 240;
const POSITION_BUCKET_PX: f64 = 3.0;
const MICRO_PAUSE_MIN_MS: f64 = 45.0;
const MICRO_PAUSE_MAX_PX: f64 = 3.0;

const FEW_SAMPLES: usize = 6;
const MIN_TIME_BUCKETS: usize = 3;
const MIN_POSITION_BUCKETS: usize = 8;
const MIN_AVERAGE_SPEED: f64 = 0.02;
const MAX_AVERAGE_SPEED: f64 = 1.8;
const MAX_BACKWARD_RATIO: f64 = 0.35;
const MAX_BACKWARD_PX: f64 = 24.0;
const MIN_VELOCITY_STD_DEV: f64 = 0.006;
const SOFT_SPEED_LIMIT: f64 = 3.2;

/// Weight added to the risk score by each soft signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskWeights {
    pub few_samples: u32,
    pub coarse_timing: u32,
    pub coarse_positions: u32,
    pub no_micro_pause: u32,
    pub abnormal_average_speed: u32,
    pub frequent_backtracking: u32,
    pub long_backtrack: u32,
    pub uniform_velocity: u32,
    pub high_peak_speed: u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            few_samples: 20,
            coarse_timing: 20,
            coarse_positions: 10,
            no_micro_pause: 10,
            abnormal_average_speed: 15,
            frequent_backtracking: 20,
            long_backtrack: 10,
            uniform_velocity: 20,
            high_peak_speed: 15,
        }
    }
}

/// Risk scoring policy
///
/// The defaults are empirically tuned, not derived. Keep them configurable
/// and re-check against real traffic before changing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskPolicy {
    /// Drags scoring strictly above this are rejected
    pub threshold: u32,
    pub weights: RiskWeights,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            threshold: 45,
            weights: RiskWeights::default(),
        }
    }
}

impl RiskPolicy {
    /// Sum the weights of every soft signal present in `metrics`
    pub fn score(&self, metrics: &TrajectoryMetrics) -> u32 {
        let w = &self.weights;
        let signals = [
            (metrics.sample_count < FEW_SAMPLES, w.few_samples),
            (metrics.time_buckets < MIN_TIME_BUCKETS, w.coarse_timing),
            (
                metrics.position_buckets < MIN_POSITION_BUCKETS,
                w.coarse_positions,
            ),
            (metrics.micro_pauses == 0, w.no_micro_pause),
            (
                metrics.average_speed < MIN_AVERAGE_SPEED
                    || metrics.average_speed > MAX_AVERAGE_SPEED,
                w.abnormal_average_speed,
            ),
            (
                metrics.backward_ratio > MAX_BACKWARD_RATIO,
                w.frequent_backtracking,
            ),
            (
                metrics.max_backward_distance > MAX_BACKWARD_PX,
                w.long_backtrack,
            ),
            (
                metrics.speed_samples >= 2 && metrics.velocity_std_dev < MIN_VELOCITY_STD_DEV,
                w.uniform_velocity,
            ),
            (metrics.peak_speed > SOFT_SPEED_LIMIT, w.high_peak_speed),
        ];

        signals
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, weight)| weight)
            .sum()
    }
}

/// Measurements of a structurally valid drag
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryMetrics {
    pub sample_count: usize,
    pub duration_ms: f64,
    pub progress: f64,
    /// Distinct 8 ms buckets among inter-sample deltas
    pub time_buckets: usize,
    /// Distinct 3 px buckets among positions
    pub position_buckets: usize,
    pub micro_pauses: usize,
    /// px/ms over the whole drag
    pub average_speed: f64,
    pub backward_ratio: f64,
    pub max_backward_distance: f64,
    /// Segments long enough to measure speed on
    pub speed_samples: usize,
    pub velocity_std_dev: f64,
    pub peak_speed: f64,
}

/// Validator result, always populated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryVerdict {
    Accepted { risk_score: u32 },
    Rejected(RejectReason),
}

impl TrajectoryVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, TrajectoryVerdict::Accepted { .. })
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            TrajectoryVerdict::Accepted { .. } => "ok",
            TrajectoryVerdict::Rejected(reason) => reason.code(),
        }
    }
}

/// Score one drag gesture
pub fn validate_trajectory(payload: &SliderPayload, policy: &RiskPolicy) -> TrajectoryVerdict {
    let metrics = match measure(payload) {
        Ok(metrics) => metrics,
        Err(reason) => return TrajectoryVerdict::Rejected(reason),
    };

    let risk_score = policy.score(&metrics);
    if risk_score > policy.threshold {
        return TrajectoryVerdict::Rejected(RejectReason::TrajectoryRiskHigh);
    }

    TrajectoryVerdict::Accepted { risk_score }
}

/// Run every structural check and collect the soft-signal measurements
pub fn measure(payload: &SliderPayload) -> Result<TrajectoryMetrics, RejectReason> {
    let trajectory = payload.trajectory.as_slice();

    // Checked first: a replayed or synthesized clock is rejected no matter
    // what else is wrong with the payload. Non-finite timestamps are left to
    // the point checks below.
    if trajectory.windows(2).any(|pair| {
        let (prev, next) = (pair[0].timestamp, pair[1].timestamp);
        prev.is_finite() && next.is_finite() && next <= prev
    }) {
        return Err(RejectReason::NonIncreasingTimestamp);
    }

    check_shape(payload)?;

    let max_position = payload.max_position();
    let (first, last) = match (trajectory.first(), trajectory.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(RejectReason::InvalidTrajectoryLength),
    };

    if !first.is_finite() {
        return Err(RejectReason::InvalidFirstPoint);
    }
    if !last.is_finite() {
        return Err(RejectReason::InvalidLastPoint);
    }

    let anchor = first.timestamp - payload.start_time;
    if !(0.0..=MAX_START_ANCHOR_MS).contains(&anchor) {
        return Err(RejectReason::InvalidStartAnchor);
    }

    let mut backward_count = 0usize;
    let mut max_backward_distance = 0.0f64;
    let mut peak_speed = 0.0f64;
    let mut micro_pauses = 0usize;
    let mut jumped = false;
    let mut velocities = Vec::with_capacity(trajectory.len());
    let mut time_buckets = HashSet::new();
    let mut position_buckets = HashSet::new();
    let mut previous: Option<TrackPoint> = None;

    for point in trajectory {
        if !point.is_finite() {
            return Err(RejectReason::InvalidPointShape);
        }
        if point.position < -POSITION_TOLERANCE || point.position > max_position + POSITION_TOLERANCE
        {
            return Err(RejectReason::PositionOutOfRange);
        }

        if let Some(prev) = previous {
            let dt = point.timestamp - prev.timestamp;
            let dp = point.position - prev.position;
            let distance = dp.abs();

            if distance > max_position * MAX_JUMP_RATIO {
                jumped = true;
            }

            if dp < 0.0 {
                backward_count += 1;
                max_backward_distance = max_backward_distance.max(distance);
            }

            if dt >= MICRO_PAUSE_MIN_MS && distance <= MICRO_PAUSE_MAX_PX {
                micro_pauses += 1;
            }

            if dt >= MIN_SPEED_SEGMENT_MS {
                let speed = distance / dt;
                if speed > HARD_SPEED_LIMIT {
                    return Err(RejectReason::SpeedTooFast);
                }
                velocities.push(dp / dt);
                peak_speed = peak_speed.max(speed);
            }

            time_buckets.insert(((dt / TIME_BUCKET_MS).floor() as i64).min(MAX_TIME_BUCKET));
        }

        position_buckets.insert((point.position / POSITION_BUCKET_PX).floor() as i64);
        previous = Some(*point);
    }

    if jumped {
        return Err(RejectReason::AbnormalJump);
    }

    let duration_ms = last.timestamp - first.timestamp;
    if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&duration_ms) {
        return Err(RejectReason::AbnormalDuration);
    }

    let progress = last.position - first.position;
    if progress < max_position * MIN_PROGRESS_RATIO {
        return Err(RejectReason::InsufficientProgress);
    }

    let end_percent = last.position / max_position * 100.0;
    if payload.position_percent < MIN_END_PERCENT || end_percent < MIN_END_PERCENT {
        return Err(RejectReason::PositionNotReached);
    }
    if (end_percent - payload.position_percent).abs() > MAX_PERCENT_DRIFT {
        return Err(RejectReason::PositionMismatch);
    }

    let segments = trajectory.len() - 1;
    Ok(TrajectoryMetrics {
        sample_count: trajectory.len(),
        duration_ms,
        progress,
        time_buckets: time_buckets.len(),
        position_buckets: position_buckets.len(),
        micro_pauses,
        average_speed: progress / duration_ms.max(1.0),
        backward_ratio: backward_count as f64 / segments.max(1) as f64,
        max_backward_distance,
        speed_samples: velocities.len(),
        velocity_std_dev: std_dev(&velocities),
        peak_speed,
    })
}

/// Sample count, declared values and geometry
fn check_shape(payload: &SliderPayload) -> Result<(), RejectReason> {
    if !(MIN_SAMPLES..=MAX_SAMPLES).contains(&payload.trajectory.len()) {
        return Err(RejectReason::InvalidTrajectoryLength);
    }
    if !payload.start_time.is_finite() || payload.start_time <= 0.0 {
        return Err(RejectReason::InvalidStartTime);
    }
    if !payload.position_percent.is_finite() || !(0.0..=100.0).contains(&payload.position_percent)
    {
        return Err(RejectReason::InvalidPositionPercent);
    }
    if !payload.container_width.is_finite()
        || !(MIN_CONTAINER_WIDTH..=MAX_CONTAINER_WIDTH).contains(&payload.container_width)
    {
        return Err(RejectReason::InvalidContainerWidth);
    }
    if !payload.slider_width.is_finite()
        || !(MIN_SLIDER_WIDTH..=MAX_SLIDER_WIDTH).contains(&payload.slider_width)
        || payload.slider_width >= payload.container_width - MIN_TRACK_MARGIN
    {
        return Err(RejectReason::InvalidSliderWidth);
    }
    Ok(())
}

/// Population standard deviation, 0 for fewer than two samples
fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() <= 1 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
