//! Aggregate builder: turns raw execution facts into per-metric trend
//! payloads.
//!
//! Every computation is a pure read-only scan of the metrics store as of the
//! injected reference instant, so results are reproducible under test with a
//! fixed clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::errors::AppError;
use crate::models::trend::{Metric, TrendData, TrendKey};
use crate::store::postgres::PgStore;

/// Active-agent counts always look back 30 days regardless of the requested
/// timeframe. This asymmetry is deliberate: dashboards show the figure next
/// to timeframe-scoped metrics and it must not jump when the user toggles
/// the window.
const ACTIVE_AGENT_LOOKBACK_DAYS: i64 = 30;

/// Seam between the refresh coordinator and whatever computes trend data.
/// Production uses [`AggregateBuilder`]; tests substitute scripted sources.
#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn compute(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError>;
}

/// Computes trend payloads from the `executions` table.
#[derive(Clone)]
pub struct AggregateBuilder {
    db: PgStore,
}

impl AggregateBuilder {
    pub fn new(db: PgStore) -> Self {
        Self { db }
    }

    async fn executions(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError> {
        let start = now - Duration::days(key.timeframe.days());
        let counts = self
            .db
            .outcome_counts(key.workspace_id, start, now)
            .await
            .map_err(AppError::from_metrics_scan)?;
        let agent_start = now - Duration::days(ACTIVE_AGENT_LOOKBACK_DAYS);
        let active_agents = self
            .db
            .distinct_agent_count(key.workspace_id, agent_start, now)
            .await
            .map_err(AppError::from_metrics_scan)?;

        Ok(TrendData::Executions {
            total: counts.total,
            succeeded: counts.succeeded,
            failed: counts.failed,
            cancelled: counts.cancelled,
            active_agents,
        })
    }

    async fn users(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError> {
        // "daily" means the reference instant's UTC calendar day, not a
        // trailing 24 hours.
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let windows = [
            day_start,
            now - Duration::days(7),
            now - Duration::days(30),
            now - Duration::days(key.timeframe.days()),
        ];

        let mut counts = [0i64; 4];
        for (i, start) in windows.iter().enumerate() {
            counts[i] = self
                .db
                .distinct_user_count(key.workspace_id, *start, now)
                .await
                .map_err(AppError::from_metrics_scan)?;
        }

        Ok(TrendData::Users {
            daily_active: counts[0],
            weekly_active: counts[1],
            monthly_active: counts[2],
            window_active: counts[3],
        })
    }

    async fn credits(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError> {
        let start = now - Duration::days(key.timeframe.days());
        let total_credits = self
            .db
            .credits_total(key.workspace_id, start, now)
            .await
            .map_err(AppError::from_metrics_scan)?;
        Ok(TrendData::Credits { total_credits })
    }

    async fn success_rate(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError> {
        let start = now - Duration::days(key.timeframe.days());
        let counts = self
            .db
            .outcome_counts(key.workspace_id, start, now)
            .await
            .map_err(AppError::from_metrics_scan)?;

        Ok(TrendData::SuccessRate {
            rate: success_rate(counts.succeeded, counts.total),
            succeeded: counts.succeeded,
            total: counts.total,
        })
    }

    async fn duration(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError> {
        let start = now - Duration::days(key.timeframe.days());
        let stats = self
            .db
            .duration_stats(key.workspace_id, start, now)
            .await
            .map_err(AppError::from_metrics_scan)?;

        Ok(TrendData::Duration {
            avg_secs: stats.avg_secs,
            samples: stats.samples,
        })
    }
}

#[async_trait]
impl TrendSource for AggregateBuilder {
    async fn compute(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<TrendData, AppError> {
        let exists = self
            .db
            .workspace_exists(key.workspace_id)
            .await
            .map_err(AppError::from_metrics_scan)?;
        if !exists {
            return Err(AppError::WorkspaceNotFound);
        }

        match key.metric {
            Metric::Executions => self.executions(key, now).await,
            Metric::Users => self.users(key, now).await,
            Metric::Credits => self.credits(key, now).await,
            Metric::SuccessRate => self.success_rate(key, now).await,
            Metric::Duration => self.duration(key, now).await,
        }
    }
}

/// Success rate over a window; 0 (not an error) when the window is empty.
fn success_rate(succeeded: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        succeeded as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_of_empty_window_is_zero() {
        assert_eq!(success_rate(0, 0), 0.0);
    }

    #[test]
    fn success_rate_is_a_ratio() {
        assert!((success_rate(7, 10) - 0.7).abs() < f64::EPSILON);
        assert_eq!(success_rate(10, 10), 1.0);
    }
}
