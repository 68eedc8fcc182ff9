//! Rate Limiting Infrastructure
//!
//! Common rate limiting configuration and decisions. Storage backends
//! live with the crates that own the counted records.

use std::time::Duration;

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Sliding window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 40,
            window: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Decide from the number of requests already seen in the window
    ///
    /// `oldest_age` is how long ago the oldest in-window request happened;
    /// the client may retry once it slides out. Never less than one second.
    pub fn decide(&self, seen: u64, oldest_age: Option<Duration>) -> RateLimitDecision {
        if seen < u64::from(self.max_requests) {
            return RateLimitDecision::Allow;
        }

        let remaining = oldest_age
            .map(|age| self.window.saturating_sub(age))
            .unwrap_or(self.window);

        RateLimitDecision::Deny {
            retry_after: remaining.max(Duration::from_secs(1)),
        }
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow)
    }
}
