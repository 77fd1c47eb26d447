use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use veilbond_types::{ReputationRecord, SenderCommitment};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding window length in seconds
    pub window_secs: i64,

    /// Requests per window for a sender with a clean record
    pub base_quota: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 3_600,
            base_quota: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: i64,
}

/// Sliding-window limiter keyed by sender commitment. Counters are
/// ephemeral by design; losing them on restart only briefly loosens
/// the limit, which is the right failure direction for this guard.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<SenderCommitment, VecDeque<i64>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Quota for a sender: shrinks with each recorded slash, never
    /// below one request per window.
    pub fn quota_for(&self, reputation: &ReputationRecord) -> u32 {
        let divisor = (1 + reputation.slashed_count).min(u32::MAX as u64) as u32;
        (self.config.base_quota / divisor).max(1)
    }

    /// Check and consume one slot under a single write lock, so two
    /// concurrent requests from the same sender cannot double-spend
    /// the last slot.
    pub async fn check_and_consume(
        &self,
        commitment: &SenderCommitment,
        reputation: &ReputationRecord,
        now: i64,
    ) -> RateLimitDecision {
        let quota = self.quota_for(reputation);
        let cutoff = now - self.config.window_secs;

        let mut windows = self.windows.write().await;
        let window = windows.entry(*commitment).or_default();

        while window.front().is_some_and(|t| *t <= cutoff) {
            window.pop_front();
        }

        if (window.len() as u32) < quota {
            window.push_back(now);
            RateLimitDecision {
                allowed: true,
                retry_after_secs: 0,
            }
        } else {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = (oldest + self.config.window_secs - now).max(1);
            debug!(
                commitment = %commitment,
                quota,
                retry_after_secs = retry_after,
                "rate limit exceeded"
            );
            RateLimitDecision {
                allowed: false,
                retry_after_secs: retry_after,
            }
        }
    }

    /// Drop windows with no activity inside the current window.
    pub async fn prune_idle(&self, now: i64) -> usize {
        let cutoff = now - self.config.window_secs;
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, w| w.back().is_some_and(|t| *t > cutoff));
        before - windows.len()
    }
}
