use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Outcome of a rate-limit check, surfaced to callers so denials can carry
/// a Retry-After computed from `reset_at`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window request counter keyed by an arbitrary identifier (an IP,
/// an API key id). Shared across all request workers; DashMap shards keep
/// contention per-key rather than per-map.
///
/// Fixed windows are intentional: a counter resets wholesale when its
/// window elapses, which permits up to twice the limit across a window
/// boundary but bounds memory and keeps the hot path to a single shard
/// lock. Do not replace with a sliding window.
pub struct RateLimiter {
    windows: DashMap<String, RateLimitWindow>,
    cleanup_interval: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_cleanup_interval(Duration::hours(1))
    }

    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            cleanup_interval,
        }
    }

    /// Count one request against `identifier`. Never errors: an unknown
    /// identifier is a first-time caller and gets a fresh window.
    pub fn check(&self, identifier: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let now = Utc::now();
        let mut entry = self
            .windows
            .entry(identifier.to_string())
            .or_insert(RateLimitWindow {
                count: 0,
                reset_at: now + window,
            });

        if now > entry.reset_at {
            // Window elapsed: replace rather than decay.
            entry.count = 1;
            entry.reset_at = now + window;
        } else {
            entry.count += 1;
        }

        RateLimitDecision {
            allowed: entry.count <= limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        }
    }

    /// Remove windows whose reset lies more than one cleanup interval in
    /// the past. Keys are snapshotted first and removed individually so a
    /// sweep never holds the map against the request path.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - self.cleanup_interval;
        let stale: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| entry.value().reset_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in stale {
            // Re-check under the shard lock; the window may have been
            // refreshed between snapshot and removal.
            if self
                .windows
                .remove_if(&key, |_, window| window.reset_at < cutoff)
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic sweep keeping memory bounded under traffic from many distinct
/// identifiers.
pub async fn rate_limiter_sweep_task(limiter: Arc<RateLimiter>, interval_secs: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        let removed = limiter.sweep();
        if removed > 0 {
            tracing::debug!("Rate limiter sweep removed {} stale windows", removed);
        }
    }
}
