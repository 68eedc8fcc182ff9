//! Crate-level tests: shared fixtures, use cases end to end against the
//! in-memory store, and the HTTP adapter.

pub(crate) mod fixtures {
    use crate::domain::value_objects::{SliderPayload, TrackPoint};

    pub const CONTAINER_WIDTH: f64 = 320.0;
    pub const SLIDER_WIDTH: f64 = 40.0;
    pub const MAX_POSITION: f64 = CONTAINER_WIDTH - SLIDER_WIDTH;
    pub const START_TIME: f64 = 1_700_000_000_000.0;

    /// (dt ms, dx px) of a plausible human drag: 900 ms, three micro-pauses
    pub const HUMAN_STEPS: [(f64, f64); 19] = [
        (40.0, 10.0),
        (50.0, 15.0),
        (40.0, 20.0),
        (60.0, 1.0),
        (50.0, 25.0),
        (40.0, 25.0),
        (50.0, 25.0),
        (40.0, 20.0),
        (50.0, 20.0),
        (40.0, 20.0),
        (50.0, 0.0),
        (50.0, 20.0),
        (40.0, 18.0),
        (50.0, 17.0),
        (40.0, 15.0),
        (70.0, 2.0),
        (50.0, 12.0),
        (40.0, 10.0),
        (50.0, 5.0),
    ];

    /// Build a drag starting at position 0, `first_offset` ms after the
    /// declared start, then applying each `(dt, dx)` step
    pub fn drag(first_offset: f64, steps: &[(f64, f64)], position_percent: f64) -> SliderPayload {
        let mut timestamp = START_TIME + first_offset;
        let mut position = 0.0;
        let mut trajectory = Vec::with_capacity(steps.len() + 1);
        trajectory.push(TrackPoint::new(position, timestamp));

        for &(dt, dx) in steps {
            timestamp += dt;
            position += dx;
            trajectory.push(TrackPoint::new(position, timestamp));
        }

        SliderPayload {
            trajectory,
            start_time: START_TIME,
            position_percent,
            container_width: CONTAINER_WIDTH,
            slider_width: SLIDER_WIDTH,
        }
    }

    pub fn human_drag() -> SliderPayload {
        drag(10.0, &HUMAN_STEPS, 100.0)
    }

    /// Five samples over 150 ms straight to the end
    pub fn scripted_drag() -> SliderPayload {
        drag(10.0, &[(37.5, 70.0); 4], 100.0)
    }
}

#[cfg(test)]
mod use_case_tests {
    use super::fixtures::*;
    use crate::application::cleanup::CleanupSweeper;
    use crate::application::config::CaptchaConfig;
    use crate::application::consume_token::ConsumeTokenUseCase;
    use crate::application::issue_challenge::{IssueCaptchaUseCase, IssueOutcome};
    use crate::application::verify_captcha::{
        VerifyCaptchaInput, VerifyCaptchaUseCase, VerifyFailure, VerifyOutcome,
    };
    use crate::domain::entities::Challenge;
    use crate::domain::services::hash_token;
    use crate::domain::value_objects::{RejectReason, SliderPayload, VerificationToken};
    use crate::infra::memory::InMemoryCaptchaRepository;
    use chrono::{TimeDelta, Utc};
    use platform::client::ClientFingerprint;
    use platform::rate_limit::RateLimitConfig;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0";

    fn client() -> ClientFingerprint {
        ClientFingerprint::new(IpAddr::from([203, 0, 113, 9]), Some(BROWSER))
    }

    struct Engine {
        repo: Arc<InMemoryCaptchaRepository>,
        config: Arc<CaptchaConfig>,
        sweeper: CleanupSweeper<InMemoryCaptchaRepository>,
        issuer: IssueCaptchaUseCase<InMemoryCaptchaRepository, InMemoryCaptchaRepository>,
        verifier: VerifyCaptchaUseCase<InMemoryCaptchaRepository>,
        consumer: ConsumeTokenUseCase<InMemoryCaptchaRepository>,
    }

    impl Engine {
        fn new() -> Self {
            Self::with_config(CaptchaConfig::for_tests())
        }

        fn with_config(config: CaptchaConfig) -> Self {
            let repo = Arc::new(InMemoryCaptchaRepository::new());
            let config = Arc::new(config);
            let sweeper = CleanupSweeper::new(repo.clone(), config.sweeper.clone());

            Self {
                issuer: IssueCaptchaUseCase::new(
                    repo.clone(),
                    repo.clone(),
                    sweeper.clone(),
                    config.clone(),
                ),
                verifier: VerifyCaptchaUseCase::new(repo.clone(), sweeper.clone(), config.clone()),
                consumer: ConsumeTokenUseCase::new(repo.clone(), sweeper.clone(), config.clone()),
                repo,
                config,
                sweeper,
            }
        }

        async fn issue(&self, fingerprint: &ClientFingerprint) -> Uuid {
            match self.issuer.execute(fingerprint).await.unwrap() {
                IssueOutcome::Issued { captcha_id, .. } => captcha_id,
                other => panic!("expected a challenge, got {other:?}"),
            }
        }

        async fn verify(
            &self,
            captcha_id: Uuid,
            payload: SliderPayload,
            fingerprint: &ClientFingerprint,
        ) -> VerifyOutcome {
            let input = VerifyCaptchaInput {
                captcha_id: captcha_id.to_string(),
                payload,
            };
            self.verifier.execute(input, fingerprint).await.unwrap()
        }

        async fn verified_token(&self, captcha_id: Uuid) -> VerificationToken {
            match self.verify(captcha_id, human_drag(), &client()).await {
                VerifyOutcome::Verified { token, .. } => token,
                other => panic!("expected verification, got {other:?}"),
            }
        }

        async fn consume(&self, captcha_id: Uuid, token: &str, fingerprint: &ClientFingerprint) -> bool {
            self.consumer
                .execute(&captcha_id.to_string(), token, fingerprint)
                .await
                .unwrap()
        }

        async fn row(&self, captcha_id: Uuid) -> Challenge {
            self.repo
                .snapshot()
                .await
                .into_iter()
                .find(|row| row.id == captcha_id)
                .expect("row present")
        }

        async fn settle(&self) {
            while self.sweeper.is_running() {
                tokio::task::yield_now().await;
            }
        }
    }

    fn failure_of(outcome: &VerifyOutcome) -> (VerifyFailure, bool) {
        match outcome {
            VerifyOutcome::Rejected {
                failure,
                refresh_captcha,
            } => (*failure, *refresh_captcha),
            VerifyOutcome::Verified { .. } => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn test_issue_creates_fresh_challenge() {
        let engine = Engine::new();
        let before = Utc::now();

        let outcome = engine.issuer.execute(&client()).await.unwrap();
        let IssueOutcome::Issued {
            captcha_id,
            expires_at,
        } = outcome
        else {
            panic!("expected a challenge");
        };

        let row = engine.row(captcha_id).await;
        assert_eq!(row.failed_attempts, 0);
        assert_eq!(row.max_attempts, 5);
        assert_eq!(row.ip_address, client().ip);
        assert_eq!(row.user_agent_hash, client().user_agent_hash);
        assert_eq!(row.expires_at, expires_at);
        assert!(expires_at >= before + TimeDelta::minutes(5));
    }

    #[tokio::test]
    async fn test_scenario_a_human_drag_is_verified() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        let outcome = engine.verify(captcha_id, human_drag(), &client()).await;
        assert!(outcome.is_valid());
        assert!(!outcome.refresh_captcha());
        assert_eq!(outcome.error_message(), None);

        let VerifyOutcome::Verified {
            token,
            token_expires_at,
        } = outcome
        else {
            panic!("expected verification");
        };

        let row = engine.row(captcha_id).await;
        let expected = hash_token(&engine.config.token_secret, token.expose());
        assert_eq!(row.verify_token_hash.as_deref(), Some(expected.as_slice()));
        assert_eq!(row.verify_token_expires_at, Some(token_expires_at));
        assert_eq!(
            token_expires_at - row.verified_at.unwrap(),
            TimeDelta::minutes(2)
        );
        assert_eq!(row.failed_attempts, 0);
        assert_eq!(row.last_error_code, None);
    }

    #[tokio::test]
    async fn test_scenario_b_scripted_drag_is_rejected() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        let outcome = engine.verify(captcha_id, scripted_drag(), &client()).await;
        let (failure, refresh) = failure_of(&outcome);

        let VerifyFailure::Trajectory(reason) = failure else {
            panic!("expected a trajectory failure, got {failure:?}");
        };
        assert!(matches!(
            reason,
            RejectReason::AbnormalDuration | RejectReason::SpeedTooFast
        ));
        assert!(!refresh);

        let row = engine.row(captcha_id).await;
        assert_eq!(row.failed_attempts, 1);
        assert_eq!(row.last_error_code, Some(reason));
    }

    #[tokio::test]
    async fn test_scenario_c_different_user_agent() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        let other = ClientFingerprint::new(client().ip, Some("curl/8.10.1"));
        let outcome = engine.verify(captcha_id, human_drag(), &other).await;

        assert_eq!(failure_of(&outcome), (VerifyFailure::Fingerprint, false));
        let row = engine.row(captcha_id).await;
        assert_eq!(row.failed_attempts, 1);
        assert_eq!(row.last_error_code, Some(RejectReason::FingerprintMismatch));
        assert!(row.verified_at.is_none());
    }

    #[tokio::test]
    async fn test_scenario_d_unknown_captcha() {
        let engine = Engine::new();

        let outcome = engine.verify(Uuid::new_v4(), human_drag(), &client()).await;
        assert_eq!(failure_of(&outcome), (VerifyFailure::NotFound, true));

        let input = VerifyCaptchaInput {
            captcha_id: "not-a-uuid".to_string(),
            payload: human_drag(),
        };
        let outcome = engine.verifier.execute(input, &client()).await.unwrap();
        assert_eq!(failure_of(&outcome), (VerifyFailure::NotFound, true));
        assert!(engine.repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_non_increasing_timestamp_is_recorded() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        let mut payload = human_drag();
        payload.trajectory[7].timestamp = payload.trajectory[6].timestamp;
        let outcome = engine.verify(captcha_id, payload, &client()).await;

        assert_eq!(
            failure_of(&outcome),
            (
                VerifyFailure::Trajectory(RejectReason::NonIncreasingTimestamp),
                false
            )
        );
        assert_eq!(
            engine.row(captcha_id).await.last_error_code,
            Some(RejectReason::NonIncreasingTimestamp)
        );
    }

    #[tokio::test]
    async fn test_failure_then_success_clears_error_code() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        engine.verify(captcha_id, scripted_drag(), &client()).await;
        assert!(engine.row(captcha_id).await.last_error_code.is_some());

        engine.verified_token(captcha_id).await;
        let row = engine.row(captcha_id).await;
        assert_eq!(row.failed_attempts, 1);
        assert_eq!(row.last_error_code, None);
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        for attempt in 1..=5 {
            let outcome = engine.verify(captcha_id, scripted_drag(), &client()).await;
            let (_, refresh) = failure_of(&outcome);
            assert_eq!(refresh, attempt == 5, "attempt {attempt}");
        }

        let row = engine.row(captcha_id).await;
        assert_eq!(row.failed_attempts, 5);
        assert!(row.expires_at <= Utc::now());

        // Even a perfect drag is refused now, without touching the counter
        let outcome = engine.verify(captcha_id, human_drag(), &client()).await;
        let (failure, refresh) = failure_of(&outcome);
        assert!(matches!(failure, VerifyFailure::Locked | VerifyFailure::Expired));
        assert!(refresh);
        assert_eq!(engine.row(captcha_id).await.failed_attempts, 5);
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_can_lock() {
        let mut config = CaptchaConfig::for_tests();
        config.max_attempts = 2;
        let engine = Engine::with_config(config);
        let captcha_id = engine.issue(&client()).await;
        let stranger = ClientFingerprint::new(IpAddr::from([192, 0, 2, 1]), Some(BROWSER));

        let first = engine.verify(captcha_id, human_drag(), &stranger).await;
        assert_eq!(failure_of(&first), (VerifyFailure::Fingerprint, false));
        let second = engine.verify(captcha_id, human_drag(), &stranger).await;
        assert_eq!(failure_of(&second), (VerifyFailure::Fingerprint, true));

        let outcome = engine.verify(captcha_id, human_drag(), &client()).await;
        assert!(!outcome.is_valid());
    }

    #[tokio::test]
    async fn test_expired_challenge() {
        let mut config = CaptchaConfig::for_tests();
        config.challenge_ttl = Duration::ZERO;
        let engine = Engine::with_config(config);
        let captcha_id = engine.issue(&client()).await;

        let outcome = engine.verify(captcha_id, human_drag(), &client()).await;
        assert_eq!(failure_of(&outcome), (VerifyFailure::Expired, true));
        assert_eq!(engine.row(captcha_id).await.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_second_verification_loses() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;
        engine.verified_token(captcha_id).await;
        let first_hash = engine.row(captcha_id).await.verify_token_hash;

        let again = engine.verify(captcha_id, human_drag(), &client()).await;
        assert_eq!(failure_of(&again), (VerifyFailure::StateChanged, true));

        let bad = engine.verify(captcha_id, scripted_drag(), &client()).await;
        assert_eq!(failure_of(&bad), (VerifyFailure::StateChanged, true));

        let row = engine.row(captcha_id).await;
        assert_eq!(row.verify_token_hash, first_hash);
        assert_eq!(row.failed_attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verifications_have_one_winner() {
        const RACERS: usize = 16;
        let engine = Arc::new(Engine::new());
        let captcha_id = engine.issue(&client()).await;

        let handles: Vec<_> = (0..RACERS)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.verify(captcha_id, human_drag(), &client()).await })
            })
            .collect();

        let mut winners = 0;
        let mut state_changed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                VerifyOutcome::Verified { .. } => winners += 1,
                VerifyOutcome::Rejected {
                    failure: VerifyFailure::StateChanged,
                    refresh_captcha: true,
                } => state_changed += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(state_changed, RACERS - 1);
    }

    #[tokio::test]
    async fn test_consume_once_then_replay_fails() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;
        let token = engine.verified_token(captcha_id).await;

        assert!(engine.consume(captcha_id, token.expose(), &client()).await);
        let row = engine.row(captcha_id).await;
        let consumed_at = row.consumed_at.expect("consumed");
        assert_eq!(row.expires_at, consumed_at);

        assert!(!engine.consume(captcha_id, token.expose(), &client()).await);
        assert_eq!(engine.row(captcha_id).await, row);

        // Consumed, or already swept away
        let replay = engine.verify(captcha_id, human_drag(), &client()).await;
        let (failure, refresh) = failure_of(&replay);
        assert!(matches!(failure, VerifyFailure::Consumed | VerifyFailure::NotFound));
        assert!(refresh);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumes_have_one_winner() {
        let engine = Arc::new(Engine::new());
        let captcha_id = engine.issue(&client()).await;
        let token = engine.verified_token(captcha_id).await.into_inner();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                let token = token.clone();
                tokio::spawn(async move { engine.consume(captcha_id, &token, &client()).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_consume_rejects_mismatches_without_side_effects() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;

        // Not verified yet
        assert!(!engine.consume(captcha_id, "anything", &client()).await);

        let token = engine.verified_token(captcha_id).await;
        let before = engine.row(captcha_id).await;

        assert!(!engine.consume(captcha_id, "wrong-token", &client()).await);
        let other_ua = ClientFingerprint::new(client().ip, Some("curl/8.10.1"));
        assert!(!engine.consume(captcha_id, token.expose(), &other_ua).await);
        let other_ip = ClientFingerprint::new(IpAddr::from([192, 0, 2, 1]), Some(BROWSER));
        assert!(!engine.consume(captcha_id, token.expose(), &other_ip).await);
        assert!(!engine.consume(Uuid::new_v4(), token.expose(), &client()).await);

        assert!(!engine.consumer.execute("", token.expose(), &client()).await.unwrap());
        assert!(
            !engine
                .consumer
                .execute(&captcha_id.to_string(), "", &client())
                .await
                .unwrap()
        );
        assert!(!engine.consumer.execute("garbage", token.expose(), &client()).await.unwrap());

        assert_eq!(engine.row(captcha_id).await, before);
        assert!(engine.consume(captcha_id, token.expose(), &client()).await);
    }

    #[tokio::test]
    async fn test_consume_after_token_expiry_fails() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;
        let token = engine.verified_token(captcha_id).await;

        engine
            .repo
            .tamper(captcha_id, |row| {
                row.verify_token_expires_at = Some(Utc::now() - TimeDelta::seconds(1));
            })
            .await;

        assert!(!engine.consume(captcha_id, token.expose(), &client()).await);
        assert!(engine.row(captcha_id).await.consumed_at.is_none());
    }

    #[tokio::test]
    async fn test_token_never_persisted() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;
        let token = engine.verified_token(captcha_id).await;

        let rows = engine.repo.snapshot().await;
        let dump = format!("{rows:?}");
        assert!(!dump.contains(token.expose()));
        for row in &rows {
            assert_ne!(row.verify_token_hash.as_deref(), Some(token.expose().as_bytes()));
        }

        assert!(!format!("{token:?}").contains(token.expose()));
    }

    #[tokio::test]
    async fn test_issue_is_throttled_per_ip() {
        let mut config = CaptchaConfig::for_tests();
        config.issue_limit = RateLimitConfig::new(3, 600);
        let engine = Engine::with_config(config);

        for _ in 0..3 {
            engine.issue(&client()).await;
        }

        match engine.issuer.execute(&client()).await.unwrap() {
            IssueOutcome::Throttled { retry_after } => {
                assert!(retry_after >= Duration::from_secs(1));
                assert!(retry_after <= Duration::from_secs(600));
            }
            other => panic!("expected throttling, got {other:?}"),
        }
        assert_eq!(engine.repo.len().await, 3);

        let neighbour = ClientFingerprint::new(IpAddr::from([203, 0, 113, 10]), Some(BROWSER));
        engine.issue(&neighbour).await;
        assert_eq!(engine.repo.len().await, 4);
    }

    #[tokio::test]
    async fn test_consume_sweeps_consumed_row() {
        let engine = Engine::new();
        let captcha_id = engine.issue(&client()).await;
        let keep = engine.issue(&client()).await;
        let token = engine.verified_token(captcha_id).await;

        assert!(engine.consume(captcha_id, token.expose(), &client()).await);
        engine.settle().await;
        // The issue-time sweep may still have been running; force one more
        engine.sweeper.sweep_now().await.unwrap();

        let ids: Vec<Uuid> = engine.repo.snapshot().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![keep]);
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_stale_rows() {
        let engine = Engine::new();
        let now = Utc::now();

        let fresh = engine.issue(&client()).await;
        let just_expired = engine.issue(&client()).await;
        let long_expired = engine.issue(&client()).await;
        let dead_token = engine.issue(&client()).await;
        let ancient = engine.issue(&client()).await;
        engine.settle().await;

        engine
            .repo
            .tamper(just_expired, |row| row.expires_at = now - TimeDelta::minutes(1))
            .await;
        engine
            .repo
            .tamper(long_expired, |row| row.expires_at = now - TimeDelta::minutes(3))
            .await;
        engine
            .repo
            .tamper(dead_token, |row| {
                row.verified_at = Some(now - TimeDelta::minutes(4));
                row.verify_token_hash = Some(vec![0; 32]);
                row.verify_token_expires_at = Some(now - TimeDelta::minutes(3));
            })
            .await;
        engine
            .repo
            .tamper(ancient, |row| {
                row.created_at = now - TimeDelta::days(2);
            })
            .await;

        assert_eq!(engine.sweeper.sweep_now().await.unwrap(), 3);

        let mut left: Vec<Uuid> = engine.repo.snapshot().await.iter().map(|r| r.id).collect();
        left.sort();
        let mut expected = vec![fresh, just_expired];
        expected.sort();
        assert_eq!(left, expected);
    }
}

#[cfg(test)]
mod race_tests {
    use super::fixtures::*;
    use crate::application::cleanup::CleanupSweeper;
    use crate::application::config::CaptchaConfig;
    use crate::application::verify_captcha::{
        VerifyCaptchaInput, VerifyCaptchaUseCase, VerifyFailure, VerifyOutcome,
    };
    use crate::domain::entities::Challenge;
    use crate::domain::repository::{ChallengeRepository, FailureCount, Redemption, StaleCutoffs};
    use crate::domain::value_objects::{RejectReason, SliderPayload};
    use crate::error::CaptchaResult;
    use crate::infra::memory::InMemoryCaptchaRepository;
    use chrono::{DateTime, TimeDelta, Utc};
    use platform::client::ClientFingerprint;
    use std::net::IpAddr;
    use std::sync::Arc;
    use tokio::sync::Barrier;
    use uuid::Uuid;

    /// Holds every reader until `gate` is full, so all of them see the
    /// same snapshot before any of them writes
    struct ReadBarrier {
        inner: InMemoryCaptchaRepository,
        gate: Barrier,
    }

    impl ChallengeRepository for ReadBarrier {
        async fn insert(&self, challenge: &Challenge) -> CaptchaResult<()> {
            self.inner.insert(challenge).await
        }

        async fn find_by_id(&self, id: Uuid) -> CaptchaResult<Option<Challenge>> {
            let row = self.inner.find_by_id(id).await?;
            self.gate.wait().await;
            Ok(row)
        }

        async fn record_failure(
            &self,
            id: Uuid,
            reason: RejectReason,
            now: DateTime<Utc>,
        ) -> CaptchaResult<Option<FailureCount>> {
            self.inner.record_failure(id, reason, now).await
        }

        async fn mark_verified(
            &self,
            id: Uuid,
            token_hash: &[u8; 32],
            token_expires_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> CaptchaResult<u64> {
            self.inner
                .mark_verified(id, token_hash, token_expires_at, now)
                .await
        }

        async fn consume(
            &self,
            redemption: &Redemption<'_>,
            now: DateTime<Utc>,
        ) -> CaptchaResult<u64> {
            self.inner.consume(redemption, now).await
        }

        async fn delete_stale(&self, cutoffs: &StaleCutoffs, limit: u32) -> CaptchaResult<u64> {
            self.inner.delete_stale(cutoffs, limit).await
        }
    }

    type Drag = fn() -> SliderPayload;

    fn client() -> ClientFingerprint {
        ClientFingerprint::new(IpAddr::from([203, 0, 113, 44]), Some("Mozilla/5.0"))
    }

    /// Two verifiers that both read the challenge before either writes
    async fn racing_verifiers(
        failed_attempts: u16,
    ) -> (
        InMemoryCaptchaRepository,
        Arc<VerifyCaptchaUseCase<ReadBarrier>>,
        Uuid,
    ) {
        let config = Arc::new(CaptchaConfig::for_tests());
        let inner = InMemoryCaptchaRepository::new();
        let mut challenge = Challenge::issue(
            &client(),
            config.max_attempts,
            TimeDelta::minutes(5),
            Utc::now(),
        );
        challenge.failed_attempts = failed_attempts;
        inner.insert(&challenge).await.unwrap();

        let repo = Arc::new(ReadBarrier {
            inner: inner.clone(),
            gate: Barrier::new(2),
        });
        let sweeper = CleanupSweeper::new(repo.clone(), config.sweeper.clone());
        let verifier = Arc::new(VerifyCaptchaUseCase::new(repo, sweeper, config));
        (inner, verifier, challenge.id)
    }

    async fn run(
        verifier: &Arc<VerifyCaptchaUseCase<ReadBarrier>>,
        captcha_id: Uuid,
        drags: [Drag; 2],
    ) -> Vec<VerifyOutcome> {
        let handles: Vec<_> = drags
            .into_iter()
            .map(|make_drag| {
                let verifier = verifier.clone();
                tokio::spawn(async move {
                    let input = VerifyCaptchaInput {
                        captcha_id: captcha_id.to_string(),
                        payload: make_drag(),
                    };
                    verifier.execute(input, &client()).await.unwrap()
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_failures_that_lock_ask_for_refresh() {
        // Both read 3/5; together they exhaust the budget
        let (repo, verifier, captcha_id) = racing_verifiers(3).await;
        let outcomes = run(&verifier, captcha_id, [scripted_drag, scripted_drag]).await;

        let row = repo.find_by_id(captcha_id).await.unwrap().unwrap();
        assert!(row.is_locked());

        let refreshes = outcomes.iter().filter(|o| o.refresh_captcha()).count();
        assert_eq!(refreshes, 1, "outcomes: {outcomes:?}");
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o.failure(), Some(VerifyFailure::Trajectory(_))))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_that_locks_beats_concurrent_success() {
        // Both read 4/5; whichever writes first decides, never both
        let (repo, verifier, captcha_id) = racing_verifiers(4).await;
        let outcomes = run(&verifier, captcha_id, [scripted_drag, human_drag]).await;

        let row = repo.find_by_id(captcha_id).await.unwrap().unwrap();
        let verified = outcomes.iter().filter(|o| o.is_valid()).count();
        if row.is_locked() {
            assert_eq!(verified, 0, "outcomes: {outcomes:?}");
            assert_eq!(row.verified_at, None);
            assert_eq!(row.verify_token_hash, None);
            assert!(outcomes.iter().all(VerifyOutcome::refresh_captcha));
        } else {
            assert_eq!(verified, 1);
            assert!(row.verified_at.is_some());
            assert_eq!(row.failed_attempts, 4);
        }
    }
}

#[cfg(test)]
mod router_tests {
    use super::fixtures::*;
    use crate::application::config::CaptchaConfig;
    use crate::infra::memory::InMemoryCaptchaRepository;
    use crate::presentation::router::captcha_router_generic;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::extract::ConnectInfo;
    use axum::http::{Method, Request, StatusCode, header};
    use platform::rate_limit::RateLimitConfig;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use tower::ServiceExt;

    const PEER: &str = "198.51.100.20:52100";

    fn app(config: CaptchaConfig) -> Router {
        captcha_router_generic(InMemoryCaptchaRepository::new(), config)
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "Mozilla/5.0");
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let mut req = builder.body(body).unwrap();
        let peer: SocketAddr = PEER.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        req
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn verify_body(captcha_id: &str) -> Value {
        let payload = human_drag();
        let trajectory: Vec<Value> = payload
            .trajectory
            .iter()
            .map(|p| json!({ "position": p.position, "timestamp": p.timestamp }))
            .collect();

        json!({
            "captchaId": captcha_id,
            "positionPercent": payload.position_percent,
            "trajectory": trajectory,
            "startTime": payload.start_time,
            "containerWidth": payload.container_width,
            "sliderWidth": payload.slider_width,
        })
    }

    #[tokio::test]
    async fn test_issue_then_verify_over_http() {
        let app = app(CaptchaConfig::for_tests());

        let (status, _, body) = send(&app, request(Method::GET, "/", None)).await;
        assert_eq!(status, StatusCode::OK);
        let captcha_id = body["captchaId"].as_str().unwrap().to_string();
        assert!(body["expiresAt"].as_i64().unwrap() > 0);

        let (status, _, body) = send(
            &app,
            request(Method::POST, "/verify", Some(verify_body(&captcha_id))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert!(!body["verificationToken"].as_str().unwrap().is_empty());
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_verify_unknown_asks_for_refresh() {
        let app = app(CaptchaConfig::for_tests());

        let (status, _, body) = send(
            &app,
            request(Method::POST, "/verify", Some(json!({ "captchaId": "nope" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert_eq!(body["refreshCaptcha"], true);
        assert!(body["error"].is_string());
        assert!(body.get("verificationToken").is_none());
    }

    #[tokio::test]
    async fn test_throttled_issue_returns_429() {
        let mut config = CaptchaConfig::for_tests();
        config.issue_limit = RateLimitConfig::new(1, 600);
        let app = app(config);

        let (status, _, _) = send(&app, request(Method::POST, "/", None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, body) = send(&app, request(Method::POST, "/", None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=600).contains(&retry_after));
        assert_eq!(body["retryAfter"].as_u64(), Some(retry_after));
    }
}
