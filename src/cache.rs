use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::errors::AppError;
use crate::models::trend::{TrendEntry, TrendKey};

/// Durable backing tier for trend entries.
///
/// The relational implementation lives in `store::postgres`; tests swap in an
/// in-memory map. Implementations must enforce the one-row-per-key identity
/// at their own layer (the Postgres impl does this with a UNIQUE constraint
/// plus an ON CONFLICT upsert), so concurrent `upsert`s for the same key
/// resolve to last-write-wins rather than duplicates.
#[async_trait]
pub trait TrendStore: Send + Sync {
    async fn fetch(&self, key: &TrendKey) -> Result<Option<TrendEntry>, AppError>;

    /// Idempotent replace. A reader racing with `upsert` sees either the old
    /// or the new entry in full, never a torn mix.
    async fn upsert(&self, key: &TrendKey, entry: &TrendEntry) -> Result<(), AppError>;

    /// Returns true when an entry existed and was removed.
    async fn remove(&self, key: &TrendKey) -> Result<bool, AppError>;

    /// Delete every entry whose expiry is non-null and has passed. Returns
    /// the number removed.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Two-tier trend cache: in-memory DashMap (tier 1) backed by the durable
/// store (tier 2). The store is the source of truth; the local tier only
/// mirrors entries this process has already seen.
///
/// The local tier honours expiry: entries are checked on read and evicted
/// lazily, with `delete_expired` doubling as the periodic local sweep.
pub struct TrendCache<S: TrendStore> {
    local: DashMap<TrendKey, TrendEntry>,
    store: S,
}

impl<S: TrendStore> TrendCache<S> {
    pub fn new(store: S) -> Arc<Self> {
        Arc::new(Self {
            local: DashMap::new(),
            store,
        })
    }

    /// Fetch a live entry. Expired entries are excluded; use [`peek`] when a
    /// stale value is an acceptable fallback.
    ///
    /// [`peek`]: TrendCache::peek
    pub async fn get(&self, key: &TrendKey, now: DateTime<Utc>) -> Result<Option<TrendEntry>, AppError> {
        // tier 1: in-memory (with freshness check)
        if let Some(entry) = self.local.get(key) {
            if entry.is_fresh(now) {
                return Ok(Some(entry.clone()));
            }
            // Stale: fall through to the store, which may hold a newer entry
            // written by another process.
        }

        // tier 2: durable store
        match self.store.fetch(key).await? {
            Some(entry) => {
                self.local.insert(key.clone(), entry.clone());
                if entry.is_fresh(now) {
                    Ok(Some(entry))
                } else {
                    Ok(None)
                }
            }
            None => {
                self.local.remove(key);
                Ok(None)
            }
        }
    }

    /// Fetch the last known entry for a key, expired or not. Used by the
    /// refresh coordinator's bounded-wait stale fallback.
    pub async fn peek(&self, key: &TrendKey) -> Result<Option<TrendEntry>, AppError> {
        if let Some(entry) = self.local.get(key) {
            return Ok(Some(entry.clone()));
        }
        match self.store.fetch(key).await? {
            Some(entry) => {
                self.local.insert(key.clone(), entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Replace the entry for a key. Writes the durable tier first so a crash
    /// between the two writes can only leave the local tier behind, never
    /// ahead, of the source of truth.
    pub async fn put(
        &self,
        key: &TrendKey,
        analysis_data: serde_json::Value,
        calculated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<TrendEntry, AppError> {
        let entry = TrendEntry {
            analysis_data,
            calculated_at,
            expires_at,
        };
        self.store.upsert(key, &entry).await?;
        self.local.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Explicit invalidation (e.g. after a bulk backfill of the underlying
    /// facts). Returns true when an entry existed.
    pub async fn invalidate(&self, key: &TrendKey) -> Result<bool, AppError> {
        self.local.remove(key);
        self.store.remove(key).await
    }

    /// Maintenance sweep: removes every entry whose expiry has passed, in
    /// both tiers. Returns the count removed from the durable store. Safe to
    /// run concurrently with reads and writes on any key.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let removed = self.store.remove_expired(now).await?;
        self.local.retain(|_, entry| entry.is_fresh(now));
        Ok(removed)
    }

    /// Current number of locally mirrored entries (for diagnostics).
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
