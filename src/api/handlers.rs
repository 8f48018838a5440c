use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Caller;
use crate::errors::AppError;
use crate::models::trend::{AnalysisResult, Metric, Timeframe, TrendKey};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct TrendParams {
    pub metric: String,
    pub timeframe: String,
    /// Window length for `timeframe=custom`.
    pub days: Option<u32>,
}

impl TrendParams {
    fn parse(&self) -> Result<(Metric, Timeframe), AppError> {
        let metric: Metric = self.metric.parse()?;
        let timeframe = Timeframe::parse(&self.timeframe, self.days)?;
        Ok((metric, timeframe))
    }
}

#[derive(Deserialize)]
pub struct InvalidateRequest {
    pub metric: String,
    pub timeframe: String,
    pub days: Option<u32>,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub invalidated: bool,
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub removed: u64,
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /api/v1/workspaces/:id/trends?metric=&timeframe=[&days=]
///
/// The access check runs before any cache interaction, identically for
/// hits and misses, so a cached entry can never widen access.
pub async fn get_trend(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<Uuid>,
    Query(params): Query<TrendParams>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<AnalysisResult>, AppError> {
    let (metric, timeframe) = params.parse()?;

    // Fail fast: no readable workspaces means no cache or compute cost.
    if !state.access.has_any_access(&caller) {
        return Err(AppError::Unauthorized);
    }
    state.access.authorize(&caller, workspace_id)?;

    let key = TrendKey::new(workspace_id, metric, timeframe);
    let result = state.coordinator.get_trend(key, Utc::now()).await?;
    Ok(Json(result))
}

/// GET /api/v1/trends?metric=&timeframe=[&days=]
///
/// One trend per workspace the caller may read. An empty membership set
/// returns an empty list without touching the cache.
pub async fn scan_trends(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendParams>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<AnalysisResult>>, AppError> {
    let (metric, timeframe) = params.parse()?;

    let mut workspaces: Vec<Uuid> = state.access.authorize_scan(&caller).iter().copied().collect();
    if workspaces.is_empty() {
        return Ok(Json(Vec::new()));
    }
    workspaces.sort();

    let now = Utc::now();
    let mut results = Vec::with_capacity(workspaces.len());
    for workspace_id in workspaces {
        let key = TrendKey::new(workspace_id, metric, timeframe);
        match state.coordinator.get_trend(key, now).await {
            Ok(result) => results.push(result),
            // A membership row can outlive its workspace; skip rather than
            // failing the whole scan.
            Err(AppError::WorkspaceNotFound) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Json(results))
}

/// POST /api/v1/workspaces/:id/trends/invalidate — explicit cache busting,
/// e.g. after a bulk backfill of execution facts.
pub async fn invalidate_trend(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let metric: Metric = req.metric.parse()?;
    let timeframe = Timeframe::parse(&req.timeframe, req.days)?;

    let key = TrendKey::new(workspace_id, metric, timeframe);
    let invalidated = state.coordinator.invalidate(&key).await?;
    tracing::info!(key = %key, invalidated, "trend cache invalidated");
    Ok(Json(InvalidateResponse { invalidated }))
}

/// POST /api/v1/maintenance/sweep — remove every entry whose expiry has
/// passed. Also runs on a schedule; this endpoint exists for ops.
pub async fn sweep_expired(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, AppError> {
    let removed = state.coordinator.sweep_expired(Utc::now()).await?;
    if removed > 0 {
        tracing::info!(removed, "expiry sweep removed entries");
    }
    Ok(Json(SweepResponse { removed }))
}
