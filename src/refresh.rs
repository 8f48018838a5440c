//! Refresh coordinator: the state machine between the trend cache and the
//! aggregate builder.
//!
//! Per key the lifecycle is MISSING → COMPUTING → FRESH → STALE → COMPUTING
//! → … with deletion as the only terminal transition. The correctness
//! property that matters is duplicate suppression: N simultaneous misses for
//! one key produce exactly one builder call. Keys never share a lock, so
//! refreshes across workspaces and metrics run fully in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::aggregate::TrendSource;
use crate::cache::{TrendCache, TrendStore};
use crate::errors::AppError;
use crate::models::trend::{AnalysisResult, TrendEntry, TrendKey, TtlConfig};

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How long a reader waits behind an in-flight refresh before falling
    /// back to the last known (stale) value.
    pub wait_timeout: Duration,
    /// Extra attempts when the metrics store is unreachable.
    pub retries: u32,
    /// Base backoff between attempts; grows linearly with the attempt count.
    pub retry_backoff: Duration,
    pub ttls: TtlConfig,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(5),
            retries: 2,
            retry_backoff: Duration::from_millis(200),
            ttls: TtlConfig::default(),
        }
    }
}

pub struct RefreshCoordinator<S: TrendStore, B: TrendSource> {
    cache: Arc<TrendCache<S>>,
    source: Arc<B>,
    /// One single-flight guard per key. Entries are tiny and the keyspace is
    /// bounded by workspaces × metrics × timeframes, so the map is never
    /// pruned.
    flights: DashMap<TrendKey, Arc<Mutex<()>>>,
    config: RefreshConfig,
}

impl<S, B> RefreshCoordinator<S, B>
where
    S: TrendStore + 'static,
    B: TrendSource + 'static,
{
    pub fn new(cache: Arc<TrendCache<S>>, source: Arc<B>, config: RefreshConfig) -> Self {
        Self {
            cache,
            source,
            flights: DashMap::new(),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<TrendCache<S>> {
        &self.cache
    }

    /// Serve a trend, refreshing through the aggregate builder when the
    /// cached entry is missing or stale.
    pub async fn get_trend(
        &self,
        key: TrendKey,
        now: DateTime<Utc>,
    ) -> Result<AnalysisResult, AppError> {
        // FRESH: no builder call, no lock.
        if let Some(entry) = self.cache.get(&key, now).await? {
            return Ok(to_result(&key, entry, false));
        }

        // MISSING or STALE: enter COMPUTING via the per-key guard.
        let lock = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match timeout(self.config.wait_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                // We may have queued behind a refresh that just landed;
                // re-check before computing so waiters coalesce onto it.
                if let Some(entry) = self.cache.get(&key, now).await? {
                    return Ok(to_result(&key, entry, false));
                }

                // Detached task: a caller that abandons this request does
                // not cancel the computation, and the result is still
                // committed for every other reader. The guard moves into
                // the task so the key stays COMPUTING until commit or
                // failure.
                let handle = tokio::spawn(refresh_key(
                    self.cache.clone(),
                    self.source.clone(),
                    key,
                    now,
                    self.config.clone(),
                    guard,
                ));
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                        "refresh task failed: {e}"
                    ))),
                }
            }
            Err(_) => {
                // Bounded wait expired while another request holds the key.
                // Serve the last known value with a staleness flag instead
                // of blocking further or double-computing.
                match self.cache.peek(&key).await? {
                    Some(entry) => {
                        // The in-flight refresh may have committed between
                        // our miss and this peek; only flag entries actually
                        // past expiry.
                        let stale = !entry.is_fresh(now);
                        tracing::debug!(key = %key, stale, "refresh in flight; serving last known entry");
                        Ok(to_result(&key, entry, stale))
                    }
                    None => Err(AppError::DataUnavailable(format!(
                        "trend {} is being computed and no previous value exists",
                        key
                    ))),
                }
            }
        }
    }

    /// Explicit cache busting, e.g. after a bulk correction of the
    /// underlying facts.
    pub async fn invalidate(&self, key: &TrendKey) -> Result<bool, AppError> {
        self.cache.invalidate(key).await
    }

    /// Maintenance sweep; returns the number of entries removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.cache.delete_expired(now).await
    }
}

/// One COMPUTING pass: bounded retries against an unreachable metrics store,
/// then commit or stale-fallback. Failures are never cached, and dropping
/// `_guard` on any exit path releases the key for the next request.
async fn refresh_key<S, B>(
    cache: Arc<TrendCache<S>>,
    source: Arc<B>,
    key: TrendKey,
    now: DateTime<Utc>,
    config: RefreshConfig,
    _guard: OwnedMutexGuard<()>,
) -> Result<AnalysisResult, AppError>
where
    S: TrendStore + 'static,
    B: TrendSource + 'static,
{
    let mut attempt: u32 = 0;
    loop {
        match source.compute(&key, now).await {
            Ok(data) => {
                let value = serde_json::to_value(&data)
                    .map_err(|e| AppError::ComputationFailed(e.to_string()))?;
                let ttl_secs = config.ttls.ttl_secs(&key.timeframe);
                let expires_at = Some(now + chrono::Duration::seconds(ttl_secs as i64));
                let entry = cache.put(&key, value, now, expires_at).await?;
                return Ok(to_result(&key, entry, false));
            }
            Err(AppError::DataUnavailable(reason)) => {
                if attempt < config.retries {
                    attempt += 1;
                    tracing::warn!(
                        key = %key,
                        attempt,
                        "metrics store unavailable ({}); backing off",
                        reason
                    );
                    tokio::time::sleep(config.retry_backoff * attempt).await;
                    continue;
                }
                // Retries exhausted. A stale value with a flag beats a hard
                // failure; only error out when there is nothing to serve.
                if let Some(entry) = cache.peek(&key).await? {
                    // Another process may have refreshed the key while we
                    // were retrying; flag only entries past expiry.
                    let stale = !entry.is_fresh(now);
                    tracing::warn!(key = %key, stale, "serving cached trend after failed refresh");
                    return Ok(to_result(&key, entry, stale));
                }
                return Err(AppError::DataUnavailable(reason));
            }
            Err(e) => return Err(e),
        }
    }
}

fn to_result(key: &TrendKey, entry: TrendEntry, stale: bool) -> AnalysisResult {
    AnalysisResult {
        workspace_id: key.workspace_id,
        metric: key.metric,
        timeframe: key.timeframe,
        data: entry.analysis_data,
        calculated_at: entry.calculated_at,
        stale,
    }
}
