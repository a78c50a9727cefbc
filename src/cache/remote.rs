//! Remote correlation cache backend.
//!
//! Talks to a shared blob-cache service over HTTP: `PUT /blobs/{key}`
//! with a `ttl_secs` query stores a blob under a server-side TTL, and
//! `POST /blobs/{key}/take` atomically fetches-and-removes it (the
//! server side guarantees exactly-once consumption across instances).
//!
//! Every call carries a bounded timeout. A timeout or connection failure
//! maps to [`CacheError::Unavailable`] so the tiered cache can fall back
//! instead of blocking a webhook response on a sick backend.

use std::time::Duration;

use async_trait::async_trait;

use super::{BlobCache, CacheError};

pub struct RemoteCache {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteCache {
    /// Build a client for the cache service at `base_url`, with
    /// `timeout` applied to every request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn blob_url(&self, key: &str) -> String {
        // Keys are sanitized segments, but encode defensively anyway.
        format!("{}/blobs/{}", self.base_url, urlencode(key))
    }
}

#[async_trait]
impl BlobCache for RemoteCache {
    async fn put(&self, key: &str, blob: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let response = self
            .client
            .put(self.blob_url(key))
            .query(&[("ttl_secs", ttl.as_secs())])
            .body(blob)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let response = self
            .client
            .post(format!("{}/take", self.blob_url(key)))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CacheError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(Some(bytes.to_vec()))
    }
}

fn map_transport_error(e: reqwest::Error) -> CacheError {
    if let Some(status) = e.status() {
        CacheError::Status(status.as_u16())
    } else {
        // Timeouts, refused connections, DNS failures: the backend is
        // unavailable as far as the caller is concerned.
        CacheError::Unavailable(e.to_string())
    }
}

/// Minimal percent-encoding for a path segment.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url_encodes_key() {
        let cache = RemoteCache::new("http://cache.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            cache.blob_url("conv_1"),
            "http://cache.local/blobs/conv_1"
        );
        assert_eq!(
            cache.blob_url("+1555"),
            "http://cache.local/blobs/%2B1555"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let cache = RemoteCache::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap();

        let err = cache
            .put("k", b"v".to_vec(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));

        let err = cache.take("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }
}
