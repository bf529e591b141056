//! Per-key usage counters bucketed by UTC day, ISO week and calendar month.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CredentialResult;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UsageWindow {
    Daily,
    Weekly,
    Monthly,
}

impl UsageWindow {
    pub const ALL: [UsageWindow; 3] = [UsageWindow::Daily, UsageWindow::Weekly, UsageWindow::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageWindow::Daily => "daily",
            UsageWindow::Weekly => "weekly",
            UsageWindow::Monthly => "monthly",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    /// First UTC day of the bucket containing `at`. Weeks start on Monday.
    pub fn window_start(&self, at: DateTime<Utc>) -> NaiveDate {
        let day = at.date_naive();
        match self {
            UsageWindow::Daily => day,
            UsageWindow::Weekly => {
                day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
            }
            UsageWindow::Monthly => day - Duration::days(i64::from(day.day0())),
        }
    }

    /// Earliest window start still current at `at`. Counters that begin before
    /// it can no longer affect any limit check.
    pub fn retention_cutoff(at: DateTime<Utc>) -> NaiveDate {
        Self::ALL
            .iter()
            .map(|window| window.window_start(at))
            .min()
            .unwrap_or_else(|| at.date_naive())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub requests: i64,
    pub cost_minor: i64,
}

/// Accumulated usage for one key across all windows at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub daily: WindowUsage,
    pub weekly: WindowUsage,
    pub monthly: WindowUsage,
}

impl UsageSnapshot {
    pub fn window(&self, window: UsageWindow) -> WindowUsage {
        match window {
            UsageWindow::Daily => self.daily,
            UsageWindow::Weekly => self.weekly,
            UsageWindow::Monthly => self.monthly,
        }
    }

    pub fn set_window(&mut self, window: UsageWindow, usage: WindowUsage) {
        match window {
            UsageWindow::Daily => self.daily = usage,
            UsageWindow::Weekly => self.weekly = usage,
            UsageWindow::Monthly => self.monthly = usage,
        }
    }
}

/// Counter storage. `increment` must be atomic at the storage layer so that
/// concurrent requests for the same key never lose an update.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn increment(
        &self,
        key_id: &str,
        at: DateTime<Utc>,
        requests: i64,
        cost_minor: i64,
    ) -> CredentialResult<()>;

    async fn snapshot(&self, key_id: &str, at: DateTime<Utc>) -> CredentialResult<UsageSnapshot>;

    /// Deletes counters whose window began before `cutoff`. Returns how many
    /// were removed.
    async fn prune_before(&self, cutoff: NaiveDate) -> CredentialResult<u64>;
}
