//! Shared test doubles: an in-memory trend store and a counting source.
//!
//! These stand in for PostgreSQL and the SQL aggregate builder so the
//! coordinator's behaviour can be verified without a database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use trendline::aggregate::TrendSource;
use trendline::cache::{TrendCache, TrendStore};
use trendline::errors::AppError;
use trendline::models::trend::{TrendData, TrendEntry, TrendKey};
use trendline::refresh::{RefreshConfig, RefreshCoordinator};

#[derive(Default)]
pub struct MemoryTrendStore {
    rows: DashMap<TrendKey, TrendEntry>,
}

#[async_trait]
impl TrendStore for MemoryTrendStore {
    async fn fetch(&self, key: &TrendKey) -> Result<Option<TrendEntry>, AppError> {
        Ok(self.rows.get(key).map(|e| e.clone()))
    }

    async fn upsert(&self, key: &TrendKey, entry: &TrendEntry) -> Result<(), AppError> {
        // Replace-in-place: the same last-write-wins identity the UNIQUE
        // constraint gives the Postgres implementation.
        self.rows.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &TrendKey) -> Result<bool, AppError> {
        Ok(self.rows.remove(key).is_some())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let before = self.rows.len();
        self.rows.retain(|_, e| e.is_fresh(now));
        Ok((before - self.rows.len()) as u64)
    }
}

/// Source returning a fixed payload, counting invocations.
pub struct CountingSource {
    calls: AtomicUsize,
    payload: TrendData,
    delay: Duration,
}

impl CountingSource {
    pub fn new(payload: TrendData) -> Self {
        Self::with_delay(payload, Duration::ZERO)
    }

    pub fn with_delay(payload: TrendData, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            payload,
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendSource for CountingSource {
    async fn compute(&self, _key: &TrendKey, _now: DateTime<Utc>) -> Result<TrendData, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.payload.clone())
    }
}

pub type TestCoordinator = RefreshCoordinator<MemoryTrendStore, CountingSource>;

/// Build a coordinator over the in-memory store, handing back the source so
/// tests can count builder invocations.
pub fn coordinator(
    payload: TrendData,
    config: RefreshConfig,
) -> (Arc<TestCoordinator>, Arc<CountingSource>) {
    let cache = TrendCache::new(MemoryTrendStore::default());
    let source = Arc::new(CountingSource::new(payload));
    let coord = Arc::new(RefreshCoordinator::new(cache, source.clone(), config));
    (coord, source)
}
