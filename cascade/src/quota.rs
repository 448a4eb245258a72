//! Quota Guard — caps use of the metered emergency engine
//!
//! Two ceilings apply: a daily limit reset by an operator, and an account
//! limit on lifetime usage that survives daily resets. The guard never
//! blocks or retries; it answers yes/no and records consumption.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::QuotaConfig;

#[derive(Debug, Default)]
struct QuotaCounters {
    daily_used: u64,
    account_used: u64,
}

/// Point-in-time view of the emergency quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub daily_limit: u64,
    pub daily_used: u64,
    pub daily_remaining: u64,
    /// Share of the daily limit consumed, in percent
    pub usage_percentage: f64,
    pub account_limit: u64,
    pub account_used: u64,
}

/// Process-wide emergency quota, shared through `Arc`.
#[derive(Debug)]
pub struct QuotaGuard {
    daily_limit: u64,
    account_limit: u64,
    counters: Mutex<QuotaCounters>,
}

impl QuotaGuard {
    pub fn new(daily_limit: u64, account_limit: u64) -> Self {
        Self {
            daily_limit,
            account_limit,
            counters: Mutex::new(QuotaCounters::default()),
        }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.daily_limit, config.account_limit)
    }

    // The critical sections below cannot panic, so a poisoned lock still
    // holds consistent counters.
    fn counters(&self) -> MutexGuard<'_, QuotaCounters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_headroom(&self, counters: &QuotaCounters) -> bool {
        counters.daily_used < self.daily_limit && counters.account_used < self.account_limit
    }

    /// Whether the emergency engine may be used right now.
    ///
    /// Advisory only: the cascade uses [`Self::try_consume_emergency_quota`]
    /// so the check and the increment cannot interleave with another block.
    pub fn can_use_emergency(&self) -> bool {
        let counters = self.counters();
        self.has_headroom(&counters)
    }

    /// Record one unit of emergency usage unconditionally.
    pub fn record_usage(&self) {
        let mut counters = self.counters();
        counters.daily_used += 1;
        counters.account_used += 1;
    }

    /// Atomically check headroom and consume one unit.
    ///
    /// Returns `false` without side effects when either ceiling is reached.
    pub fn try_consume_emergency_quota(&self) -> bool {
        let mut counters = self.counters();
        if !self.has_headroom(&counters) {
            debug!(
                daily_used = counters.daily_used,
                daily_limit = self.daily_limit,
                account_used = counters.account_used,
                account_limit = self.account_limit,
                "Emergency quota exhausted"
            );
            return false;
        }
        counters.daily_used += 1;
        counters.account_used += 1;
        true
    }

    /// Operator action: zero the daily counter. Account usage is kept.
    pub fn reset_daily(&self) {
        let mut counters = self.counters();
        let previous = counters.daily_used;
        counters.daily_used = 0;
        info!(
            previous_daily_used = previous,
            daily_limit = self.daily_limit,
            "Emergency daily quota reset"
        );
    }

    pub fn daily_used(&self) -> u64 {
        self.counters().daily_used
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub fn daily_remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.daily_used())
    }

    pub fn status(&self) -> QuotaStatus {
        let counters = self.counters();
        let usage_percentage = if self.daily_limit > 0 {
            counters.daily_used as f64 / self.daily_limit as f64 * 100.0
        } else {
            0.0
        };
        QuotaStatus {
            daily_limit: self.daily_limit,
            daily_used: counters.daily_used,
            daily_remaining: self.daily_limit.saturating_sub(counters.daily_used),
            usage_percentage,
            account_limit: self.account_limit,
            account_used: counters.account_used,
        }
    }
}

impl Default for QuotaGuard {
    fn default() -> Self {
        Self::from_config(&QuotaConfig::default())
    }
}
