use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    cache::store::{CacheLease, CacheStore},
    catalog::model::MediaDescriptor,
    foundation::config::RetrievalConfig,
    foundation::error::RetrievalError,
    retrieve::origin::{FetchedMedia, OriginTransport, Origins},
    retrieve::retry::RetryPolicy,
};

/// Counters exposed for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RetrieverStats {
    /// Fetches answered from the local cache.
    pub cache_hits: u64,
    /// Transport attempts made against origins (retries included).
    pub origin_fetches: u64,
}

/// Cache-first media retrieval with per-descriptor retry.
#[derive(Debug)]
pub struct Retriever {
    cache: Arc<CacheStore>,
    origins: Origins,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    cache_hits: AtomicU64,
    origin_fetches: AtomicU64,
}

impl Retriever {
    pub fn new(
        cache: Arc<CacheStore>,
        origins: Origins,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            origins,
            retry,
            attempt_timeout,
            cache_hits: AtomicU64::new(0),
            origin_fetches: AtomicU64::new(0),
        }
    }

    pub fn from_config(cache: Arc<CacheStore>, origins: Origins, cfg: &RetrievalConfig) -> Self {
        Self::new(cache, origins, RetryPolicy::from(cfg), cfg.attempt_timeout())
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
        }
    }

    /// Materialize `descriptor` as a local file.
    ///
    /// A cache hit returns without touching the origin. Otherwise the origin transport for the
    /// descriptor's kind is tried under the retry policy and a success is cached before returning.
    pub async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<PathBuf, RetrievalError> {
        self.fetch_impl(descriptor, None).await
    }

    /// [`Retriever::fetch`], keeping the returned file pinned under `lease`.
    pub async fn fetch_leased(
        &self,
        descriptor: &MediaDescriptor,
        lease: &Arc<CacheLease>,
    ) -> Result<PathBuf, RetrievalError> {
        self.fetch_impl(descriptor, Some(lease)).await
    }

    async fn fetch_impl(
        &self,
        descriptor: &MediaDescriptor,
        lease: Option<&Arc<CacheLease>>,
    ) -> Result<PathBuf, RetrievalError> {
        let origin_id = descriptor.origin_id.clone();

        let cache = Arc::clone(&self.cache);
        let id = origin_id.clone();
        let held = lease.cloned();
        let hit = tokio::task::spawn_blocking(move || match held {
            Some(lease) => cache.get_leased(&id, &lease),
            None => cache.get(&id),
        })
        .await
        .map_err(|e| RetrievalError::storage(format!("cache lookup task failed: {e}")))?;
        if let Some(path) = hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(origin_id = %origin_id, "cache hit");
            return Ok(path);
        }
        tracing::debug!(origin_id = %origin_id, kind = %descriptor.origin_kind, "cache miss");

        let transport = self
            .origins
            .transport_for(descriptor.origin_kind)
            .ok_or_else(|| {
                RetrievalError::unsupported(format!(
                    "no transport registered for {} origins",
                    descriptor.origin_kind
                ))
            })?;
        let media = self.fetch_with_retry(transport.as_ref(), descriptor).await?;

        let cache = Arc::clone(&self.cache);
        let size_hint = media.size_hint();
        let held = lease.cloned();
        tokio::task::spawn_blocking(move || match held {
            Some(lease) => cache.put_leased(&origin_id, &media.bytes, size_hint, &lease),
            None => cache.put(&origin_id, &media.bytes, size_hint),
        })
        .await
        .map_err(|e| RetrievalError::storage(format!("cache write task failed: {e}")))?
        .map_err(|e| RetrievalError::storage(e.to_string()))
    }

    async fn fetch_with_retry(
        &self,
        transport: &dyn OriginTransport,
        descriptor: &MediaDescriptor,
    ) -> Result<FetchedMedia, RetrievalError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.origin_fetches.fetch_add(1, Ordering::Relaxed);
            let result = match tokio::time::timeout(self.attempt_timeout, transport.fetch(descriptor))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(RetrievalError::timeout(format!(
                    "attempt exceeded {:?}",
                    self.attempt_timeout
                ))),
            };

            match result {
                Ok(media) => {
                    tracing::info!(
                        origin_id = %descriptor.origin_id,
                        bytes = media.bytes.len(),
                        attempt,
                        "downloaded media"
                    );
                    return Ok(media);
                }
                Err(e) if e.is_retryable() && self.retry.allows_retry_after(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        origin_id = %descriptor.origin_id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "retrieval attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        origin_id = %descriptor.origin_id,
                        attempt,
                        error = %e,
                        "retrieval failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/retrieve/retriever.rs"]
mod tests;
