//! PostgreSQL Repository Implementations
//!
//! Every transition is one `UPDATE` whose `WHERE` clause is the full
//! precondition set; the affected-row count is the only success signal.

use chrono::{DateTime, Utc};
use platform::rate_limit::{RateLimitConfig, RateLimitDecision};
use sqlx::PgPool;
use std::net::IpAddr;
use uuid::Uuid;

use crate::application::config::to_delta;
use crate::domain::entities::Challenge;
use crate::domain::repository::{
    ChallengeRepository, FailureCount, IssueQuota, Redemption, StaleCutoffs,
};
use crate::domain::value_objects::RejectReason;
use crate::error::{CaptchaError, CaptchaResult};

/// PostgreSQL-backed repository
#[derive(Clone)]
pub struct PgCaptchaRepository {
    pool: PgPool,
}

impl PgCaptchaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ChallengeRepository for PgCaptchaRepository {
    async fn insert(&self, challenge: &Challenge) -> CaptchaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO slider_captcha_challenges (
                id,
                ip_address,
                user_agent_hash,
                created_at,
                expires_at,
                failed_attempts,
                max_attempts
            ) VALUES ($1, $2::inet, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(challenge.id)
        .bind(challenge.ip_address.to_string())
        .bind(&challenge.user_agent_hash)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(i32::from(challenge.failed_attempts))
        .bind(i32::from(challenge.max_attempts))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CaptchaResult<Option<Challenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r#"
            SELECT
                id,
                host(ip_address) AS ip_address,
                user_agent_hash,
                created_at,
                expires_at,
                failed_attempts,
                max_attempts,
                last_error_code,
                verified_at,
                verify_token_hash,
                verify_token_expires_at,
                consumed_at
            FROM slider_captcha_challenges
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChallengeRow::into_challenge).transpose()
    }

    async fn record_failure(
        &self,
        id: Uuid,
        reason: RejectReason,
        now: DateTime<Utc>,
    ) -> CaptchaResult<Option<FailureCount>> {
        let row = sqlx::query_as::<_, FailureCountRow>(
            r#"
            UPDATE slider_captcha_challenges
            SET failed_attempts = LEAST(failed_attempts + 1, max_attempts),
                last_error_code = $2,
                expires_at = CASE
                    WHEN failed_attempts + 1 >= max_attempts THEN $3
                    ELSE expires_at
                END
            WHERE id = $1
              AND consumed_at IS NULL
              AND verified_at IS NULL
              AND failed_attempts < max_attempts
              AND expires_at > $3
            RETURNING failed_attempts, max_attempts
            "#,
        )
        .bind(id)
        .bind(reason.code())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FailureCountRow::into_count))
    }

    async fn mark_verified(
        &self,
        id: Uuid,
        token_hash: &[u8; 32],
        token_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CaptchaResult<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE slider_captcha_challenges
            SET verified_at = $4,
                verify_token_hash = $2,
                verify_token_expires_at = $3,
                last_error_code = NULL
            WHERE id = $1
              AND consumed_at IS NULL
              AND verified_at IS NULL
              AND failed_attempts < max_attempts
              AND expires_at > $4
            "#,
        )
        .bind(id)
        .bind(token_hash.as_slice())
        .bind(token_expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    async fn consume(&self, redemption: &Redemption<'_>, now: DateTime<Utc>) -> CaptchaResult<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE slider_captcha_challenges
            SET consumed_at = $5,
                expires_at = $5
            WHERE id = $1
              AND ip_address = $2::inet
              AND user_agent_hash = $3
              AND verify_token_hash = $4
              AND verified_at IS NOT NULL
              AND verify_token_expires_at > $5
              AND consumed_at IS NULL
              AND expires_at > $5
            "#,
        )
        .bind(redemption.captcha_id)
        .bind(redemption.fingerprint.ip.to_string())
        .bind(redemption.fingerprint.user_agent_hash.as_slice())
        .bind(redemption.token_hash.as_slice())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    async fn delete_stale(&self, cutoffs: &StaleCutoffs, limit: u32) -> CaptchaResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM slider_captcha_challenges
            WHERE id IN (
                SELECT id FROM slider_captcha_challenges
                WHERE consumed_at IS NOT NULL
                   OR expires_at < $1
                   OR verify_token_expires_at < $1
                   OR created_at < $2
                LIMIT $3
            )
            "#,
        )
        .bind(cutoffs.expired_before)
        .bind(cutoffs.created_before)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }
}

impl IssueQuota for PgCaptchaRepository {
    async fn check(
        &self,
        ip: IpAddr,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> CaptchaResult<RateLimitDecision> {
        let window_start = now
            .checked_sub_signed(to_delta(config.window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (seen, oldest) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(*), MIN(created_at)
            FROM slider_captcha_challenges
            WHERE ip_address = $1::inet
              AND created_at > $2
            "#,
        )
        .bind(ip.to_string())
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        let oldest_age = oldest.and_then(|at| (now - at).to_std().ok());
        Ok(config.decide(u64::try_from(seen).unwrap_or(0), oldest_age))
    }
}

// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct FailureCountRow {
    failed_attempts: i32,
    max_attempts: i32,
}

impl FailureCountRow {
    fn into_count(self) -> FailureCount {
        FailureCount {
            failed_attempts: u16::try_from(self.failed_attempts).unwrap_or(0),
            max_attempts: u16::try_from(self.max_attempts).unwrap_or(0),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    ip_address: String,
    user_agent_hash: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    failed_attempts: i32,
    max_attempts: i32,
    last_error_code: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    verify_token_hash: Option<Vec<u8>>,
    verify_token_expires_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
}

impl ChallengeRow {
    fn into_challenge(self) -> CaptchaResult<Challenge> {
        let ip_address = self.ip_address.parse().map_err(|_| {
            CaptchaError::Internal(format!("Unparseable ip_address on captcha {}", self.id))
        })?;

        Ok(Challenge {
            id: self.id,
            ip_address,
            user_agent_hash: self.user_agent_hash,
            created_at: self.created_at,
            expires_at: self.expires_at,
            failed_attempts: u16::try_from(self.failed_attempts).unwrap_or(0),
            max_attempts: u16::try_from(self.max_attempts).unwrap_or(0),
            last_error_code: self.last_error_code.as_deref().and_then(RejectReason::from_code),
            verified_at: self.verified_at,
            verify_token_hash: self.verify_token_hash,
            verify_token_expires_at: self.verify_token_expires_at,
            consumed_at: self.consumed_at,
        })
    }
}
