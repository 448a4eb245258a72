//! Usage statistics across all resolved blocks

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::quota::QuotaGuard;

/// Process-wide request counters. Written only by the cascade controller.
#[derive(Debug, Default)]
pub struct UsageStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    fallback_usage: AtomicU64,
    emergency_usage: AtomicU64,
}

/// Rolled-up view for reporting collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub fallback_usage: u64,
    pub emergency_usage: u64,
    /// Percentages of `total_requests`; zero when nothing was processed
    pub success_rate: f64,
    pub fallback_rate: f64,
    pub emergency_rate: f64,
    pub emergency_daily_usage: u64,
    pub emergency_remaining: u64,
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished block resolution.
    pub fn record_request(&self, success: bool, used_fallback: bool, used_emergency: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        }
        if used_fallback {
            self.fallback_usage.fetch_add(1, Ordering::Relaxed);
        }
        if used_emergency {
            self.emergency_usage.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, quota: &QuotaGuard) -> UsageSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let fallback = self.fallback_usage.load(Ordering::Relaxed);
        let emergency = self.emergency_usage.load(Ordering::Relaxed);
        let quota_status = quota.status();

        UsageSnapshot {
            total_requests: total,
            successful_requests: successful,
            fallback_usage: fallback,
            emergency_usage: emergency,
            success_rate: percent(successful, total),
            fallback_rate: percent(fallback, total),
            emergency_rate: percent(emergency, total),
            emergency_daily_usage: quota_status.daily_used,
            emergency_remaining: quota_status.daily_remaining,
        }
    }
}
