//! Correlation cache for joining the two halves of a call.
//!
//! The transcription record and the audio blob for one conversation
//! arrive as separate webhooks, in either order. Whichever arrives first
//! waits here, keyed by the sanitized conversation id, until its
//! counterpart shows up or the TTL expires.
//!
//! A remote backend with native TTL support is preferred when configured;
//! when it is unreachable or times out, operations fall back transparently
//! to an in-process map. The cache never blocks a caller waiting for the
//! counterpart to arrive.

pub mod memory;
pub mod remote;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryCache;
pub use remote::RemoteCache;

/// Errors from a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or timed out. The only condition
    /// the tiered cache masks by falling back.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an unexpected status. Not maskable.
    #[error("cache backend returned status {0}")]
    Status(u16),
}

/// Capability interface for blob storage with TTL semantics.
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Store a blob under a key. A duplicate put overwrites (last write
    /// wins).
    async fn put(&self, key: &str, blob: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Atomic fetch-and-remove. `None` means not yet arrived, expired, or
    /// already consumed; callers cannot tell these apart.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
}

/// Remote-primary cache with transparent in-process fallback.
///
/// Only [`CacheError::Unavailable`] triggers the fallback; any other
/// failure propagates untouched.
pub struct TieredCache {
    primary: Option<RemoteCache>,
    fallback: MemoryCache,
}

impl TieredCache {
    pub fn new(primary: Option<RemoteCache>) -> Self {
        Self {
            primary,
            fallback: MemoryCache::new(),
        }
    }

    /// Direct access to the in-process layer (used by the periodic
    /// expiry sweep; the remote backend expires entries natively).
    pub fn local(&self) -> &MemoryCache {
        &self.fallback
    }
}

#[async_trait]
impl BlobCache for TieredCache {
    async fn put(&self, key: &str, blob: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if let Some(primary) = &self.primary {
            match primary.put(key, blob.clone(), ttl).await {
                Ok(()) => return Ok(()),
                Err(CacheError::Unavailable(reason)) => {
                    tracing::warn!("Remote cache unavailable ({}), using in-memory", reason);
                }
                Err(e) => return Err(e),
            }
        }
        self.fallback.put(key, blob, ttl).await
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(primary) = &self.primary {
            match primary.take(key).await {
                Ok(Some(blob)) => return Ok(Some(blob)),
                // A remote miss still checks the local layer: the entry
                // may have been written during an earlier outage.
                Ok(None) => {}
                Err(CacheError::Unavailable(reason)) => {
                    tracing::warn!("Remote cache unavailable ({}), using in-memory", reason);
                }
                Err(e) => return Err(e),
            }
        }
        self.fallback.take(key).await
    }
}
