//! Trend cache domain types: the closed metric/timeframe enumerations, the
//! cache key identity, and the analysis payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// Upper bound for `custom:<days>` timeframes (two years).
pub const MAX_CUSTOM_DAYS: u32 = 730;

/// The closed set of analytics dimensions we precompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Executions,
    Users,
    Credits,
    SuccessRate,
    Duration,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Executions => "executions",
            Metric::Users => "users",
            Metric::Credits => "credits",
            Metric::SuccessRate => "success_rate",
            Metric::Duration => "duration",
        }
    }
}

impl FromStr for Metric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executions" => Ok(Metric::Executions),
            "users" => Ok(Metric::Users),
            "credits" => Ok(Metric::Credits),
            "success_rate" => Ok(Metric::SuccessRate),
            "duration" => Ok(Metric::Duration),
            other => Err(AppError::InvalidArgument(format!(
                "unknown metric '{}' (expected one of: executions, users, credits, success_rate, duration)",
                other
            ))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookback window over which a metric is aggregated.
///
/// `Custom` carries an explicit day count; the canonical string form is
/// `custom:<days>` so it round-trips through the cache table untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Days7,
    Days30,
    Days90,
    Year1,
    Custom { days: u32 },
}

impl Timeframe {
    /// Window length in whole days.
    pub fn days(&self) -> i64 {
        match self {
            Timeframe::Days7 => 7,
            Timeframe::Days30 => 30,
            Timeframe::Days90 => 90,
            Timeframe::Year1 => 365,
            Timeframe::Custom { days } => *days as i64,
        }
    }

    /// Parse the query-string form: a named timeframe, or `custom` plus an
    /// explicit `days` parameter.
    pub fn parse(s: &str, days: Option<u32>) -> Result<Self, AppError> {
        if s == "custom" {
            let days = days.ok_or_else(|| {
                AppError::InvalidArgument(
                    "timeframe 'custom' requires a 'days' parameter".to_string(),
                )
            })?;
            return Self::custom(days);
        }
        s.parse()
    }

    fn custom(days: u32) -> Result<Self, AppError> {
        if days == 0 || days > MAX_CUSTOM_DAYS {
            return Err(AppError::InvalidArgument(format!(
                "custom timeframe must be between 1 and {} days",
                MAX_CUSTOM_DAYS
            )));
        }
        Ok(Timeframe::Custom { days })
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(Timeframe::Days7),
            "30d" => Ok(Timeframe::Days30),
            "90d" => Ok(Timeframe::Days90),
            "1y" => Ok(Timeframe::Year1),
            other => {
                if let Some(n) = other.strip_prefix("custom:") {
                    let days: u32 = n.parse().map_err(|_| {
                        AppError::InvalidArgument(format!("invalid custom timeframe '{}'", other))
                    })?;
                    return Self::custom(days);
                }
                Err(AppError::InvalidArgument(format!(
                    "unknown timeframe '{}' (expected one of: 7d, 30d, 90d, 1y, custom)",
                    other
                )))
            }
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Days7 => f.write_str("7d"),
            Timeframe::Days30 => f.write_str("30d"),
            Timeframe::Days90 => f.write_str("90d"),
            Timeframe::Year1 => f.write_str("1y"),
            Timeframe::Custom { days } => write!(f, "custom:{}", days),
        }
    }
}

impl Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Composite cache identity. At most one cache entry exists per key; the
/// storage layer enforces this with a UNIQUE constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrendKey {
    pub workspace_id: Uuid,
    pub metric: Metric,
    pub timeframe: Timeframe,
}

impl TrendKey {
    pub fn new(workspace_id: Uuid, metric: Metric, timeframe: Timeframe) -> Self {
        Self {
            workspace_id,
            metric,
            timeframe,
        }
    }
}

impl fmt::Display for TrendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workspace_id, self.metric, self.timeframe)
    }
}

/// A stored trend result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntry {
    pub analysis_data: serde_json::Value,
    pub calculated_at: DateTime<Utc>,
    /// `None` means the entry never auto-expires and can only be removed by
    /// explicit invalidation.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TrendEntry {
    /// An entry is fresh when it has no expiry or its expiry lies in the
    /// future relative to the request's reference instant.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => expires_at > now,
        }
    }
}

/// Typed analysis payloads, one variant per metric. Stored in the cache as
/// opaque JSON; dashboards consume them as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum TrendData {
    Executions {
        total: i64,
        succeeded: i64,
        failed: i64,
        cancelled: i64,
        /// Distinct agents active in a fixed trailing 30-day window,
        /// independent of the requested timeframe. Intentional: dashboards
        /// want this figure stable across timeframe toggles.
        active_agents: i64,
    },
    Users {
        daily_active: i64,
        weekly_active: i64,
        monthly_active: i64,
        /// Distinct users within the requested timeframe window.
        window_active: i64,
    },
    Credits {
        total_credits: i64,
    },
    SuccessRate {
        rate: f64,
        succeeded: i64,
        total: i64,
    },
    Duration {
        /// NULL (not zero) when no execution in the window carried a
        /// duration — callers must distinguish "no data" from "instant".
        avg_secs: Option<f64>,
        samples: i64,
    },
}

/// What the read API returns: the payload plus enough metadata for a caller
/// to judge how current it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub workspace_id: Uuid,
    pub metric: Metric,
    pub timeframe: Timeframe,
    pub data: serde_json::Value,
    pub calculated_at: DateTime<Utc>,
    /// True when this result was served past its expiry because a refresh
    /// was unavailable or still in flight.
    pub stale: bool,
}

/// Cache TTL per timeframe. Short windows change often and get short TTLs;
/// long windows barely move and can be cached for hours.
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub secs_7d: u64,
    pub secs_30d: u64,
    pub secs_90d: u64,
    pub secs_1y: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            secs_7d: 900,
            secs_30d: 1800,
            secs_90d: 3600,
            secs_1y: 21600,
        }
    }
}

impl TtlConfig {
    /// TTL in seconds for a timeframe. Custom windows reuse the shortest TTL
    /// since we know nothing about how volatile they are.
    pub fn ttl_secs(&self, timeframe: &Timeframe) -> u64 {
        match timeframe {
            Timeframe::Days7 => self.secs_7d,
            Timeframe::Days30 => self.secs_30d,
            Timeframe::Days90 => self.secs_90d,
            Timeframe::Year1 => self.secs_1y,
            Timeframe::Custom { .. } => self.secs_7d,
        }
    }
}
