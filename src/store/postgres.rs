use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::TrendStore;
use crate::errors::AppError;
use crate::models::execution::{DurationStats, ExecutionStatus, OutcomeCounts};
use crate::models::trend::{TrendEntry, TrendKey};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Workspace / membership (read-only; owned by the identity provider) --

    pub async fn workspace_exists(&self, workspace_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM workspaces WHERE id = $1)")
            .bind(workspace_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Workspaces the caller may read. With `include_self_scope`, workspaces
    /// where the caller authored executions are added even without
    /// membership — the configurable "see own rows" carve-out.
    pub async fn authorized_workspaces(
        &self,
        user_id: Uuid,
        include_self_scope: bool,
    ) -> Result<HashSet<Uuid>, sqlx::Error> {
        let sql = if include_self_scope {
            r#"
            SELECT workspace_id FROM workspace_members WHERE user_id = $1
            UNION
            SELECT DISTINCT workspace_id FROM executions WHERE user_id = $1
            "#
        } else {
            "SELECT workspace_id FROM workspace_members WHERE user_id = $1"
        };

        let rows = sqlx::query_scalar::<_, Uuid>(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().collect())
    }

    // -- Metrics Store scans (append-only facts; we only ever SELECT) --

    /// Outcome counts over [start, end]. `failed` folds together the
    /// 'failed' and 'error' statuses; dashboards treat both as failures.
    pub async fn outcome_counts(
        &self,
        workspace_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<OutcomeCounts, sqlx::Error> {
        sqlx::query_as::<_, OutcomeCounts>(
            r#"
            SELECT
                COUNT(*)                                       AS total,
                COUNT(*) FILTER (WHERE status = $4)            AS succeeded,
                COUNT(*) FILTER (WHERE status IN ($5, $6))     AS failed,
                COUNT(*) FILTER (WHERE status = $7)            AS cancelled
            FROM executions
            WHERE workspace_id = $1 AND started_at >= $2 AND started_at <= $3
            "#,
        )
        .bind(workspace_id)
        .bind(start)
        .bind(end)
        .bind(ExecutionStatus::Success.as_str())
        .bind(ExecutionStatus::Failed.as_str())
        .bind(ExecutionStatus::Error.as_str())
        .bind(ExecutionStatus::Cancelled.as_str())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn distinct_user_count(
        &self,
        workspace_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(DISTINCT user_id)
            FROM executions
            WHERE workspace_id = $1 AND started_at >= $2 AND started_at <= $3
            "#,
        )
        .bind(workspace_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn distinct_agent_count(
        &self,
        workspace_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(DISTINCT agent_id)
            FROM executions
            WHERE workspace_id = $1 AND started_at >= $2 AND started_at <= $3
            "#,
        )
        .bind(workspace_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
    }

    /// Credit total over the window; 0 for an empty window.
    pub async fn credits_total(
        &self,
        workspace_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(credits_used), 0)::BIGINT
            FROM executions
            WHERE workspace_id = $1 AND started_at >= $2 AND started_at <= $3
            "#,
        )
        .bind(workspace_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
    }

    /// Mean duration over the window. AVG over zero rows is NULL, which is
    /// exactly the "no data" signal the API contract requires.
    pub async fn duration_stats(
        &self,
        workspace_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DurationStats, sqlx::Error> {
        sqlx::query_as::<_, DurationStats>(
            r#"
            SELECT
                AVG(duration_secs)::float8   AS avg_secs,
                COUNT(duration_secs)         AS samples
            FROM executions
            WHERE workspace_id = $1
              AND started_at >= $2 AND started_at <= $3
              AND duration_secs IS NOT NULL
            "#,
        )
        .bind(workspace_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
    }
}

/// Row shape for trend cache reads.
#[derive(sqlx::FromRow)]
struct TrendCacheRow {
    analysis_data: serde_json::Value,
    calculated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl TrendStore for PgStore {
    async fn fetch(&self, key: &TrendKey) -> Result<Option<TrendEntry>, AppError> {
        let row = sqlx::query_as::<_, TrendCacheRow>(
            r#"
            SELECT analysis_data, calculated_at, expires_at
            FROM trend_cache
            WHERE workspace_id = $1 AND metric = $2 AND timeframe = $3
            "#,
        )
        .bind(key.workspace_id)
        .bind(key.metric.as_str())
        .bind(key.timeframe.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| TrendEntry {
            analysis_data: r.analysis_data,
            calculated_at: r.calculated_at,
            expires_at: r.expires_at,
        }))
    }

    async fn upsert(&self, key: &TrendKey, entry: &TrendEntry) -> Result<(), AppError> {
        // Single-statement upsert: atomic w.r.t. concurrent readers, and the
        // UNIQUE constraint makes concurrent writers last-write-wins.
        sqlx::query(
            r#"
            INSERT INTO trend_cache (workspace_id, metric, timeframe, analysis_data, calculated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT trend_cache_identity DO UPDATE
                SET analysis_data = EXCLUDED.analysis_data,
                    calculated_at = EXCLUDED.calculated_at,
                    expires_at    = EXCLUDED.expires_at
            "#,
        )
        .bind(key.workspace_id)
        .bind(key.metric.as_str())
        .bind(key.timeframe.to_string())
        .bind(&entry.analysis_data)
        .bind(entry.calculated_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &TrendKey) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM trend_cache WHERE workspace_id = $1 AND metric = $2 AND timeframe = $3",
        )
        .bind(key.workspace_id)
        .bind(key.metric.as_str())
        .bind(key.timeframe.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result =
            sqlx::query("DELETE FROM trend_cache WHERE expires_at IS NOT NULL AND expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
