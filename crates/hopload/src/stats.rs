//! 📊 stats.rs: "How are we doing?" asked eighteen workers at once, none of them waiting.
//!
//! 🧠 Every counter is an `AtomicU64`. Every update is a single `fetch_add`. No locks,
//! no lost updates, no "well it was 9,999 on my machine".
//!
//! ⚠️ `total` is never stored. It is `success + error`, computed on read, so the
//! two can never disagree about how many requests happened. Snapshots read each
//! counter separately and may be a few updates stale; it's a dashboard, not a ledger.
//!
//! 🦆 The duck has been counted. The duck is one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 🔢 The one piece of shared mutable state that every worker hammers.
#[derive(Debug)]
pub struct StatsAggregator {
    success: AtomicU64,
    error: AtomicU64,
    total_latency_ms: AtomicU64,
    total_result_size: AtomicU64,
    min_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    started_at: Instant,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    /// ⏱️ The throughput clock starts now.
    pub fn new() -> Self {
        Self::started(Instant::now())
    }

    pub fn started(started_at: Instant) -> Self {
        Self {
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_result_size: AtomicU64::new(0),
            min_latency_ms: AtomicU64::new(u64::MAX),
            max_latency_ms: AtomicU64::new(0),
            started_at,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// ✅ One attempt came back with an answer.
    pub fn record_success(&self, latency_ms: u64, result_size: u64) {
        self.track_latency(latency_ms);
        self.total_result_size
            .fetch_add(result_size, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    /// 💀 One attempt didn't. Its latency still counts; pain has a duration too.
    pub fn record_error(&self, latency_ms: u64) {
        self.track_latency(latency_ms);
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    fn track_latency(&self, latency_ms: u64) {
        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms
            .fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms
            .fetch_max(latency_ms, Ordering::Relaxed);
    }

    /// 📏 Fastest and slowest attempt so far, or `None` before the first one lands.
    pub fn latency_range(&self) -> Option<(u64, u64)> {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        let max = self.max_latency_ms.load(Ordering::Relaxed);
        (min != u64::MAX).then_some((min, max))
    }

    /// 📸 Derived view of the counters right now.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_over(self.started_at.elapsed())
    }

    pub(crate) fn snapshot_over(&self, elapsed: Duration) -> StatsSnapshot {
        let success = self.success.load(Ordering::Relaxed);
        let error = self.error.load(Ordering::Relaxed);
        let total = success + error;
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        let total_result_size = self.total_result_size.load(Ordering::Relaxed);

        let minutes = elapsed.as_secs_f64() / 60.0;
        StatsSnapshot {
            total,
            success,
            error,
            avg_latency_ms: ratio(total_latency_ms, total),
            throughput_per_minute: if minutes > 0.0 {
                total as f64 / minutes
            } else {
                0.0
            },
            avg_result_size: ratio(total_result_size, success),
            elapsed,
        }
    }
}

fn ratio(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// 📸 Counters plus the numbers people actually look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub avg_latency_ms: f64,
    pub throughput_per_minute: f64,
    /// averaged over successes only; failures have no size
    pub avg_result_size: f64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    pub fn success_pct(&self) -> f64 {
        ratio(self.success * 100, self.total)
    }

    pub fn error_pct(&self) -> f64 {
        ratio(self.error * 100, self.total)
    }
}
