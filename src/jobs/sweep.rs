//! Background job: expiry sweep for the trend cache.
//!
//! Removes entries whose `expires_at` has passed. Entries with a null expiry
//! are never touched — those are only removed by explicit invalidation.
//! The sweep runs on its own schedule and takes no per-key locks, so it
//! never blocks (or is blocked by) reads and refreshes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::cache::{TrendCache, TrendStore};

/// Spawn the periodic sweep task. Call this once at startup.
pub fn spawn<S: TrendStore + 'static>(cache: Arc<TrendCache<S>>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match cache.delete_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, "sweep: removed expired trend entries");
                }
                Err(e) => {
                    tracing::error!("sweep job failed: {}", e);
                }
            }
        }
    });
}
