//! Integration tests for the trend read path: cache identity, freshness,
//! single-flight refresh, expiry, and tenant isolation.
//!
//! Everything here runs against the in-memory store in `common`; the
//! Postgres-backed store shares the same `TrendStore` contract.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use uuid::Uuid;

use common::{coordinator, CountingSource, MemoryTrendStore};
use trendline::access::{AccessFilter, Caller};
use trendline::cache::TrendCache;
use trendline::errors::AppError;
use trendline::models::trend::{Metric, Timeframe, TrendData, TrendKey, TtlConfig};
use trendline::refresh::{RefreshConfig, RefreshCoordinator};

fn quick_config() -> RefreshConfig {
    RefreshConfig {
        wait_timeout: Duration::from_secs(5),
        retries: 2,
        retry_backoff: Duration::from_millis(1),
        ttls: TtlConfig::default(),
    }
}

mod single_flight {
    use super::*;

    /// N simultaneous cache-misses for one key produce exactly one builder
    /// call; every caller receives the same committed result.
    #[tokio::test]
    async fn simultaneous_misses_share_one_refresh() {
        let cache = TrendCache::new(MemoryTrendStore::default());
        let source = Arc::new(CountingSource::with_delay(
            TrendData::Credits { total_credits: 640 },
            Duration::from_millis(40),
        ));
        let coord = Arc::new(RefreshCoordinator::new(
            cache,
            source.clone(),
            quick_config(),
        ));

        let key = TrendKey::new(Uuid::new_v4(), Metric::Credits, Timeframe::Days30);
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let coord = coord.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { coord.get_trend(key, now).await }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(source.calls(), 1);
        for r in &results {
            assert!(!r.stale);
            assert_eq!(r.data["total_credits"], 640);
            assert_eq!(r.calculated_at, results[0].calculated_at);
        }
    }

    #[tokio::test]
    async fn different_workspaces_refresh_independently() {
        let (coord, source) = coordinator(
            TrendData::Credits { total_credits: 1 },
            quick_config(),
        );
        let now = Utc::now();

        let workspaces = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for _ in 0..2 {
            for workspace in workspaces {
                let key = TrendKey::new(workspace, Metric::Credits, Timeframe::Days7);
                coord.get_trend(key, now).await.unwrap();
            }
        }

        // Six distinct keys, six computations; re-reads of the same key
        // would have hit cache.
        assert_eq!(source.calls(), 6);
    }
}

mod cache_invariants {
    use super::*;

    /// Putting twice with an identical key leaves exactly one row — the
    /// storage identity is replace-in-place, never append.
    #[tokio::test]
    async fn put_is_idempotent_per_key() {
        let cache = TrendCache::new(MemoryTrendStore::default());
        let key = TrendKey::new(Uuid::new_v4(), Metric::Users, Timeframe::Days90);
        let now = Utc::now();
        let data = serde_json::json!({"metric": "users", "window_active": 9});

        cache.put(&key, data.clone(), now, Some(now + ChronoDuration::hours(1))).await.unwrap();
        cache.put(&key, data, now, Some(now + ChronoDuration::hours(1))).await.unwrap();

        assert_eq!(cache.local_len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_hidden_then_swept() {
        let cache = TrendCache::new(MemoryTrendStore::default());
        let now = Utc::now();

        let expired = TrendKey::new(Uuid::new_v4(), Metric::Credits, Timeframe::Days7);
        let pinned = TrendKey::new(Uuid::new_v4(), Metric::Credits, Timeframe::Days7);
        cache
            .put(&expired, serde_json::json!({}), now, Some(now - ChronoDuration::minutes(1)))
            .await
            .unwrap();
        cache.put(&pinned, serde_json::json!({}), now, None).await.unwrap();

        // Excluded from get even before the sweep runs.
        assert!(cache.get(&expired, now).await.unwrap().is_none());

        let removed = cache.delete_expired(now).await.unwrap();
        assert_eq!(removed, 1);

        // Null expiry is never swept.
        assert!(cache.get(&pinned, now).await.unwrap().is_some());
    }
}

mod access_isolation {
    use super::*;

    /// A caller authorized for workspace A never receives workspace B's
    /// data, even when both have live cache entries for the same metric
    /// and timeframe.
    #[tokio::test]
    async fn cross_workspace_reads_are_rejected_before_the_cache() {
        let (coord, source) = coordinator(
            TrendData::Credits { total_credits: 99 },
            quick_config(),
        );
        let now = Utc::now();

        let workspace_a = Uuid::new_v4();
        let workspace_b = Uuid::new_v4();

        // Both workspaces hold live entries for the identical key shape.
        for ws in [workspace_a, workspace_b] {
            coord
                .get_trend(TrendKey::new(ws, Metric::Credits, Timeframe::Days7), now)
                .await
                .unwrap();
        }
        let computed = source.calls();

        // The read path authorizes before touching the cache, exactly as
        // the API handler does.
        let caller_a = Caller::new(Uuid::new_v4(), [workspace_a].into_iter().collect());
        let denial = AccessFilter.authorize(&caller_a, workspace_b).unwrap_err();
        assert!(matches!(denial, AppError::Unauthorized));

        // Denied requests cost nothing: no cache read, no recompute.
        assert_eq!(source.calls(), computed);
    }

    #[tokio::test]
    async fn empty_membership_yields_empty_scan_without_compute() {
        let (_coord, source) = coordinator(
            TrendData::Credits { total_credits: 7 },
            quick_config(),
        );

        let caller = Caller::new(Uuid::new_v4(), Default::default());
        assert!(!AccessFilter.has_any_access(&caller));
        assert!(AccessFilter.authorize_scan(&caller).is_empty());
        assert_eq!(source.calls(), 0);
    }
}

mod refresh_scenarios {
    use super::*;

    /// Workspace with 7 successes out of 10 executions over 7d: the first
    /// read computes 0.7; the second, inside the TTL, is served FRESH with
    /// no new builder invocation.
    #[tokio::test]
    async fn success_rate_is_cached_within_ttl() {
        let (coord, source) = coordinator(
            TrendData::SuccessRate {
                rate: 0.7,
                succeeded: 7,
                total: 10,
            },
            quick_config(),
        );
        let key = TrendKey::new(Uuid::new_v4(), Metric::SuccessRate, Timeframe::Days7);
        let now = Utc::now();

        let first = coord.get_trend(key.clone(), now).await.unwrap();
        assert_eq!(first.data["rate"], 0.7);
        assert_eq!(first.data["succeeded"], 7);
        assert!(!first.stale);

        let later = now + ChronoDuration::minutes(5);
        let second = coord.get_trend(key, later).await.unwrap();
        assert_eq!(second.data["rate"], 0.7);
        assert_eq!(second.calculated_at, first.calculated_at);
        assert_eq!(source.calls(), 1);
    }

    /// 90d TTL configured at one hour; with an entry whose expiry was
    /// fabricated one minute in the past, the next read walks
    /// STALE → COMPUTING → FRESH and lands an updated calculated_at.
    #[tokio::test]
    async fn backdated_expiry_triggers_recomputation() {
        let mut config = quick_config();
        config.ttls.secs_90d = 3600;
        let (coord, source) = coordinator(
            TrendData::Duration {
                avg_secs: Some(12.5),
                samples: 48,
            },
            config,
        );
        let key = TrendKey::new(Uuid::new_v4(), Metric::Duration, Timeframe::Days90);
        let now = Utc::now();

        coord
            .cache()
            .put(
                &key,
                serde_json::json!({"metric": "duration", "avg_secs": 40.0, "samples": 3}),
                now - ChronoDuration::hours(2),
                Some(now - ChronoDuration::minutes(1)),
            )
            .await
            .unwrap();

        let refreshed = coord.get_trend(key.clone(), now).await.unwrap();
        assert!(!refreshed.stale);
        assert_eq!(refreshed.calculated_at, now);
        assert_eq!(refreshed.data["avg_secs"], 12.5);
        assert_eq!(source.calls(), 1);

        let entry = coord.cache().get(&key, now).await.unwrap().unwrap();
        assert_eq!(entry.expires_at, Some(now + ChronoDuration::seconds(3600)));
    }

    /// Explicit invalidation removes the row; the next read recomputes.
    #[tokio::test]
    async fn invalidation_busts_the_cache() {
        let (coord, source) = coordinator(
            TrendData::Credits { total_credits: 3 },
            quick_config(),
        );
        let key = TrendKey::new(Uuid::new_v4(), Metric::Credits, Timeframe::Year1);
        let now = Utc::now();

        coord.get_trend(key.clone(), now).await.unwrap();
        assert!(coord.invalidate(&key).await.unwrap());

        coord.get_trend(key, now).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    /// "No data" payloads survive the cache untouched: average duration is
    /// null, not zero, for a workspace without qualifying executions.
    #[tokio::test]
    async fn empty_window_duration_round_trips_as_null() {
        let (coord, _source) = coordinator(
            TrendData::Duration {
                avg_secs: None,
                samples: 0,
            },
            quick_config(),
        );
        let key = TrendKey::new(Uuid::new_v4(), Metric::Duration, Timeframe::Days30);

        let result = coord.get_trend(key, Utc::now()).await.unwrap();
        assert!(result.data["avg_secs"].is_null());
        assert_eq!(result.data["samples"], 0);

        let decoded: TrendData = serde_json::from_value(result.data).unwrap();
        assert_eq!(
            decoded,
            TrendData::Duration {
                avg_secs: None,
                samples: 0
            }
        );
    }
}
