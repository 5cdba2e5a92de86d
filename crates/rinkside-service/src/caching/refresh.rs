use std::future::Future;
use std::time::{Duration, Instant};

use super::{CacheKey, CacheStore, CacheValue, RefreshError};

/// Per-resource settings for storing refreshed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// The TTL written along with a refreshed value.
    pub ttl: Duration,
    /// Whether an empty value, as decided by [`CacheValue::is_empty`], may be stored.
    pub cache_empty: bool,
}

impl RefreshPolicy {
    /// A policy storing every successful value, including empty ones.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache_empty: true,
        }
    }

    pub fn cache_empty(mut self, cache_empty: bool) -> Self {
        self.cache_empty = cache_empty;
        self
    }
}

/// The settled result of a refresh, shared by every caller joined on it.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome<T> {
    Success(T),
    Failure(RefreshError),
}

impl<T> RefreshOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<T, RefreshError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
        }
    }
}

/// Awaits the producer future and writes a successful value to the store.
///
/// The store write finishes before this returns, so anybody observing a [`Success`] will also
/// find the value in the store. A failed write is logged, but the value is still returned.
///
/// [`Success`]: RefreshOutcome::Success
pub async fn run_refresh<T, F>(
    store: &CacheStore,
    key: &CacheKey,
    policy: RefreshPolicy,
    produce: F,
) -> RefreshOutcome<T>
where
    T: CacheValue,
    F: Future<Output = anyhow::Result<T>>,
{
    metric!(counter("caches.computation") += 1, "cache" => key.as_str());
    let started = Instant::now();

    let value = match produce.await {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                key = %key,
                error = %format_args!("{err:#}"),
                "Refresh failed, keeping previous cache entry",
            );
            metric!(counter("caches.refresh") += 1, "cache" => key.as_str(), "status" => "failure");
            return RefreshOutcome::Failure(RefreshError::from_producer(&err));
        }
    };

    metric!(timer("caches.refresh.duration") = started.elapsed(), "cache" => key.as_str());

    if !policy.cache_empty && value.is_empty() {
        tracing::warn!(key = %key, "Refresh returned an empty result, keeping previous cache entry");
        metric!(counter("caches.refresh") += 1, "cache" => key.as_str(), "status" => "empty");
        return RefreshOutcome::Failure(RefreshError::EmptyResult);
    }

    if let Err(err) = store.put(key, &value, policy.ttl) {
        tracing::error!(
            error = &err as &dyn std::error::Error,
            key = %key,
            "Failed to write refreshed cache entry",
        );
        metric!(counter("caches.file.write_error") += 1, "cache" => key.as_str());
    }

    metric!(counter("caches.refresh") += 1, "cache" => key.as_str(), "status" => "success");
    tracing::debug!(key = %key, elapsed = ?started.elapsed(), "Refreshed cache entry");
    RefreshOutcome::Success(value)
}
