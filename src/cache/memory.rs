//! In-process correlation cache.
//!
//! The fallback backend when no remote cache is configured or the remote
//! is unreachable. There is no native TTL here; expiry is computed lazily
//! on every read from the stored insertion time, with an optional sweep
//! to bound growth from entries that are never read.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{BlobCache, CacheError};

/// A blob waiting for its counterpart.
#[derive(Debug, Clone)]
struct PendingBlob {
    blob: Vec<u8>,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
}

impl PendingBlob {
    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(self.inserted_at) > ttl,
            Err(_) => false,
        }
    }
}

/// Mutex-guarded map of pending blobs.
///
/// All operations on one key are atomic with respect to concurrent
/// callers: two takes for the same key never both observe presence, and
/// a take that returns `None` has removed nothing.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, PendingBlob>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at an explicit time. Production callers go through the
    /// [`BlobCache`] impl; tests drive a simulated clock through here.
    pub async fn put_at(&self, key: &str, blob: Vec<u8>, ttl: Duration, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(
            key.to_string(),
            PendingBlob {
                blob,
                inserted_at: now,
                ttl,
            },
        );
        if previous.is_some() {
            tracing::warn!("Overwriting cached blob for key {} (last write wins)", key);
        }
    }

    /// Fetch-and-remove at an explicit time, honoring lazy expiry.
    pub async fn take_at(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            Some(entry) => entry.expired_at(now),
            None => return None,
        };

        // Removed exactly once either way: expiry discards, a hit hands
        // the blob to the single winning caller.
        let entry = entries.remove(key)?;
        if expired {
            tracing::debug!(
                "Cache entry for {} expired (age: {}s)",
                key,
                now.signed_duration_since(entry.inserted_at).num_seconds()
            );
            return None;
        }

        Some(entry.blob)
    }

    /// Drop expired entries that were never read. Returns how many were
    /// removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobCache for MemoryCache {
    async fn put(&self, key: &str, blob: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.put_at(key, blob, ttl, Utc::now()).await;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.take_at(key, Utc::now()).await)
    }
}
