//! Per-source rate limiting, both sides of the queue
//!
//! Two deliberately different techniques:
//!
//! - `FixedWindowLimiter` guards ingest. O(1) per check, lazy window
//!   reset on the next observation after expiry. A source can burst up
//!   to ~2x the nominal rate across a window boundary; the queue-side
//!   limiter is the stricter backstop, so the cheap check stays cheap.
//! - `SlidingWindowLimiter` guards dequeue-time admission. True sliding
//!   window over recent admission timestamps, pruned on every check.
//!
//! Both keep per-source state in a sharded concurrent map; updates for
//! one source serialize on its entry, so concurrent pops cannot admit
//! past the limit.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

/// Per-source fixed-window counter state
#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counter, one window per source
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<i64, FixedWindow>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// Check-and-count an observation for a source. Returns false when
    /// the current window is exhausted; a rejection has no side effect
    /// on the counter. While a window is live its count only grows; the
    /// reset happens on the first observation after expiry, not on a
    /// timer.
    pub fn check(&self, source_id: i64) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(source_id).or_insert(FixedWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 1;
            return true;
        }

        if entry.count >= self.limit {
            trace!(source_id, "ingest window exhausted");
            return false;
        }

        entry.count += 1;
        true
    }

    /// Current count within the live window (0 if none)
    pub fn current_count(&self, source_id: i64) -> u32 {
        self.windows.get(&source_id).map(|w| w.count).unwrap_or(0)
    }
}

/// Sliding-window admission limiter, one timestamp sequence per source
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    admissions: DashMap<i64, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            admissions: DashMap::new(),
        }
    }

    /// Prune expired admissions, then admit and record in one step.
    /// Prune-compare-record happens under the source's entry lock, so
    /// two concurrent pops for the same source cannot both slip past
    /// the limit.
    pub fn try_admit(&self, source_id: i64) -> bool {
        let now = Instant::now();
        let mut entry = self.admissions.entry(source_id).or_default();

        while let Some(front) = entry.front() {
            if now.duration_since(*front) > self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.limit as usize {
            trace!(source_id, "admission window full");
            return false;
        }

        entry.push_back(now);
        true
    }

    /// Admissions currently inside the window for a source
    pub fn admitted_count(&self, source_id: i64) -> usize {
        let now = Instant::now();
        self.admissions
            .get(&source_id)
            .map(|q| {
                q.iter()
                    .filter(|t| now.duration_since(**t) <= self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_rejects_at_limit() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check(1));
        assert!(limiter.check(1));
        assert!(limiter.check(1));
        // Fourth observation within the same window is rejected
        assert!(!limiter.check(1));
        assert_eq!(limiter.current_count(1), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_lazy_reset() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check(1));
        assert!(limiter.check(1));
        assert!(!limiter.check(1));

        advance(Duration::from_secs(61)).await;

        // First observation after expiry starts a fresh window
        assert!(limiter.check(1));
        assert_eq!(limiter.current_count(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_per_source_isolation() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check(1));
        assert!(!limiter.check(1));
        // A different source has its own window
        assert!(limiter.check(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_boundary_burst_is_possible() {
        // Documented trade-off: limit admissions right before expiry
        // plus a fresh window right after can reach ~2x nominal rate
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check(1));
        assert!(limiter.check(1));
        advance(Duration::from_secs(60)).await;
        assert!(limiter.check(1));
        assert!(limiter.check(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_admits_and_rejects() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.try_admit(1));
        assert!(limiter.try_admit(1));
        assert!(!limiter.try_admit(1));
        assert_eq!(limiter.admitted_count(1), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_prunes_continuously() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.try_admit(1));
        advance(Duration::from_secs(40)).await;
        assert!(limiter.try_admit(1));
        assert!(!limiter.try_admit(1));

        // Only the first admission has aged out: exactly one slot frees
        advance(Duration::from_secs(25)).await;
        assert!(limiter.try_admit(1));
        assert!(!limiter.try_admit(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_rejection_has_no_side_effect() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.try_admit(1));
        for _ in 0..10 {
            assert!(!limiter.try_admit(1));
        }
        // Rejections never extend the window
        advance(Duration::from_secs(61)).await;
        assert!(limiter.try_admit(1));
    }
}
