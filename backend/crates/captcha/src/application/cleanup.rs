//! Cleanup Sweeper
//!
//! Best-effort batched deletion of dead challenges. Each sweeper instance
//! owns its throttle state, so independent instances never interfere.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::application::config::{SweeperConfig, to_delta};
use crate::domain::repository::{ChallengeRepository, StaleCutoffs};
use crate::error::CaptchaResult;

const NEVER: u64 = u64::MAX;

/// What a trigger call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    /// A sweep was started in the background
    Spawned,
    /// Last sweep was too recent
    Cooling,
    /// Another sweep from this instance is still running
    InFlight,
    /// Called outside a tokio runtime
    NoRuntime,
}

#[derive(Debug)]
struct SweepState {
    started: Instant,
    /// Millis since `started` of the last sweep start
    last_run_ms: AtomicU64,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the sweep ends, however it ends
struct InFlightGuard(Arc<SweepState>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Throttled, reentrancy-guarded cleanup of stale challenges
pub struct CleanupSweeper<C> {
    repo: Arc<C>,
    config: SweeperConfig,
    state: Arc<SweepState>,
}

impl<C> Clone for CleanupSweeper<C> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<C> CleanupSweeper<C>
where
    C: ChallengeRepository + Sync + 'static,
{
    pub fn new(repo: Arc<C>, config: SweeperConfig) -> Self {
        Self {
            repo,
            config,
            state: Arc::new(SweepState {
                started: Instant::now(),
                last_run_ms: AtomicU64::new(NEVER),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Start a background sweep unless one ran within the cooldown
    pub fn trigger(&self) -> SweepTrigger {
        self.spawn(false)
    }

    /// Start a background sweep ignoring the cooldown
    ///
    /// Still collapses into a sweep that is already running.
    pub fn trigger_forced(&self) -> SweepTrigger {
        self.spawn(true)
    }

    /// Sweep inline, returning the number of deleted rows
    ///
    /// Returns 0 without touching the store when a sweep is already running.
    pub async fn sweep_now(&self) -> CaptchaResult<u64> {
        let Some(_guard) = self.claim(true) else {
            return Ok(0);
        };
        self.run_sweep(Utc::now()).await
    }

    pub fn is_running(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire)
    }

    fn spawn(&self, forced: bool) -> SweepTrigger {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return SweepTrigger::NoRuntime;
        };

        if !forced && self.cooling() {
            return SweepTrigger::Cooling;
        }

        let Some(guard) = self.claim(forced) else {
            return SweepTrigger::InFlight;
        };

        let sweeper = self.clone();
        handle.spawn(async move {
            let _guard = guard;
            if let Err(e) = sweeper.run_sweep(Utc::now()).await {
                tracing::warn!(error = %e, "Captcha cleanup failed");
            }
        });

        SweepTrigger::Spawned
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.state.started.elapsed().as_millis()).unwrap_or(NEVER - 1)
    }

    fn cooling(&self) -> bool {
        let last = self.state.last_run_ms.load(Ordering::Acquire);
        if last == NEVER {
            return false;
        }
        let cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(NEVER);
        self.elapsed_ms().saturating_sub(last) < cooldown_ms
    }

    fn claim(&self, forced: bool) -> Option<InFlightGuard> {
        self.state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // Lost a cooldown race against another trigger
        if !forced && self.cooling() {
            self.state.in_flight.store(false, Ordering::Release);
            return None;
        }

        self.state
            .last_run_ms
            .store(self.elapsed_ms(), Ordering::Release);
        Some(InFlightGuard(Arc::clone(&self.state)))
    }

    fn cutoffs(&self, now: DateTime<Utc>) -> StaleCutoffs {
        let back = |d: Duration| {
            now.checked_sub_signed(to_delta(d))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        };
        StaleCutoffs {
            expired_before: back(self.config.expired_grace),
            created_before: back(self.config.retention),
        }
    }

    async fn run_sweep(&self, now: DateTime<Utc>) -> CaptchaResult<u64> {
        let cutoffs = self.cutoffs(now);
        let deleted = self
            .repo
            .delete_stale(&cutoffs, self.config.batch_limit)
            .await?;

        if deleted > 0 {
            tracing::debug!(deleted, "Captcha cleanup removed stale challenges");
        }

        Ok(deleted)
    }
}
