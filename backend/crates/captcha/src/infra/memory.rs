//! In-Memory Repository
//!
//! Row store for tests and local runs. Each method is a single critical
//! section over the map, which gives it the same all-or-nothing semantics
//! as one conditioned statement in Postgres.

use chrono::{DateTime, Utc};
use platform::rate_limit::{RateLimitConfig, RateLimitDecision};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::config::to_delta;
use crate::domain::entities::Challenge;
use crate::domain::repository::{
    ChallengeRepository, FailureCount, IssueQuota, Redemption, StaleCutoffs,
};
use crate::domain::value_objects::RejectReason;
use crate::error::CaptchaResult;

#[derive(Clone, Default)]
pub struct InMemoryCaptchaRepository {
    rows: Arc<RwLock<HashMap<Uuid, Challenge>>>,
}

impl InMemoryCaptchaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Copy of every stored row
    pub async fn snapshot(&self) -> Vec<Challenge> {
        self.rows.read().await.values().cloned().collect()
    }

    /// Edit a row in place, bypassing every guard
    #[cfg(test)]
    pub(crate) async fn tamper<F>(&self, id: Uuid, edit: F) -> bool
    where
        F: FnOnce(&mut Challenge),
    {
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                edit(row);
                true
            }
            None => false,
        }
    }
}

fn is_stale(row: &Challenge, cutoffs: &StaleCutoffs) -> bool {
    row.consumed_at.is_some()
        || row.expires_at < cutoffs.expired_before
        || row
            .verify_token_expires_at
            .is_some_and(|at| at < cutoffs.expired_before)
        || row.created_at < cutoffs.created_before
}

/// Shared guard of the failure and verification writes
fn is_open(row: &Challenge, now: DateTime<Utc>) -> bool {
    row.consumed_at.is_none()
        && row.verified_at.is_none()
        && row.failed_attempts < row.max_attempts
        && row.expires_at > now
}

impl ChallengeRepository for InMemoryCaptchaRepository {
    async fn insert(&self, challenge: &Challenge) -> CaptchaResult<()> {
        self.rows
            .write()
            .await
            .insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CaptchaResult<Option<Challenge>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        reason: RejectReason,
        now: DateTime<Utc>,
    ) -> CaptchaResult<Option<FailureCount>> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };

        if !is_open(row, now) {
            return Ok(None);
        }

        let next = row.failed_attempts.saturating_add(1);
        row.failed_attempts = next.min(row.max_attempts);
        row.last_error_code = Some(reason);
        if next >= row.max_attempts {
            row.expires_at = now;
        }
        Ok(Some(FailureCount {
            failed_attempts: row.failed_attempts,
            max_attempts: row.max_attempts,
        }))
    }

    async fn mark_verified(
        &self,
        id: Uuid,
        token_hash: &[u8; 32],
        token_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CaptchaResult<u64> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(0);
        };

        if !is_open(row, now) {
            return Ok(0);
        }

        row.verified_at = Some(now);
        row.verify_token_hash = Some(token_hash.to_vec());
        row.verify_token_expires_at = Some(token_expires_at);
        row.last_error_code = None;
        Ok(1)
    }

    async fn consume(&self, redemption: &Redemption<'_>, now: DateTime<Utc>) -> CaptchaResult<u64> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&redemption.captcha_id) else {
            return Ok(0);
        };

        let matches = row.ip_address == redemption.fingerprint.ip
            && row.user_agent_hash == redemption.fingerprint.user_agent_hash
            && row.verify_token_hash.as_deref() == Some(redemption.token_hash.as_slice())
            && row.verified_at.is_some()
            && row.verify_token_expires_at.is_some_and(|at| at > now)
            && row.consumed_at.is_none()
            && row.expires_at > now;

        if !matches {
            return Ok(0);
        }

        row.consumed_at = Some(now);
        row.expires_at = now;
        Ok(1)
    }

    async fn delete_stale(&self, cutoffs: &StaleCutoffs, limit: u32) -> CaptchaResult<u64> {
        let mut rows = self.rows.write().await;
        let stale: Vec<Uuid> = rows
            .values()
            .filter(|row| is_stale(row, cutoffs))
            .map(|row| row.id)
            .take(limit as usize)
            .collect();

        for id in &stale {
            rows.remove(id);
        }
        Ok(stale.len() as u64)
    }
}

impl IssueQuota for InMemoryCaptchaRepository {
    async fn check(
        &self,
        ip: IpAddr,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> CaptchaResult<RateLimitDecision> {
        let window_start = now
            .checked_sub_signed(to_delta(config.window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let rows = self.rows.read().await;
        let in_window = rows
            .values()
            .filter(|row| row.ip_address == ip && row.created_at > window_start);

        let (seen, oldest) = in_window.fold((0u64, None), |(seen, oldest), row| {
            let oldest = match oldest {
                Some(at) if at <= row.created_at => Some(at),
                _ => Some(row.created_at),
            };
            (seen + 1, oldest)
        });

        let oldest_age = oldest.and_then(|at: DateTime<Utc>| (now - at).to_std().ok());
        Ok(config.decide(seen, oldest_age))
    }
}
