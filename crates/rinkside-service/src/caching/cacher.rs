use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    CacheEntry, CacheKey, CacheStore, CacheValue, Coalescer, InFlight, RefreshOutcome,
    RefreshPolicy, run_refresh,
};

/// Where a [`Fetched`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// A stored value within its TTL.
    #[serde(rename = "cache")]
    Fresh,
    /// A stored value past its TTL.
    Stale,
    /// A value that was just produced, because nothing was stored.
    Live,
    /// The caller-provided fallback. Neither the store nor the producer had anything.
    Fallback,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Fresh => "cache",
            CacheStatus::Stale => "stale",
            CacheStatus::Live => "live",
            CacheStatus::Fallback => "fallback",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The answer to a [`Cacher::request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub status: CacheStatus,
    /// When the value was produced. `None` for fallbacks.
    pub stored_at: Option<DateTime<Utc>>,
}

impl<T> Fetched<T> {
    fn from_entry(entry: CacheEntry<T>, status: CacheStatus) -> Self {
        Self {
            value: entry.value,
            status,
            stored_at: Some(entry.stored_at),
        }
    }
}

/// The stale-while-revalidate policy engine on top of a [`CacheStore`].
///
/// All refreshes go through one [`Coalescer`], so there is at most one producer running per key
/// no matter whether it was started by a request, by [`refresh`](Self::refresh), or both.
pub struct Cacher<T> {
    store: Arc<CacheStore>,
    coalescer: Coalescer<T>,
}

impl<T> Clone for Cacher<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            coalescer: self.coalescer.clone(),
        }
    }
}

impl<T> fmt::Debug for Cacher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacher")
            .field("store", &self.store)
            .field("coalescer", &self.coalescer)
            .finish()
    }
}

impl<T: CacheValue> Cacher<T> {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            coalescer: Coalescer::new(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn coalescer(&self) -> &Coalescer<T> {
        &self.coalescer
    }

    /// Returns the best available value for `key`.
    ///
    /// `produce` is only called when a refresh actually has to be started. Fresh entries are
    /// returned as they are. Stale entries are returned right away as well, while a refresh is
    /// kicked off in the background. Without any entry, this waits for the refresh, and falls
    /// back to whatever the store has by then, or to `fallback` if that is nothing.
    pub async fn request<P, F>(
        &self,
        key: &CacheKey,
        policy: RefreshPolicy,
        produce: P,
        fallback: T,
    ) -> Fetched<T>
    where
        P: FnOnce() -> F,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        metric!(counter("caches.access") += 1, "cache" => key.as_str());

        match self.store.get::<T>(key) {
            Some(entry) if entry.is_fresh() => {
                metric!(counter("caches.fresh.hit") += 1, "cache" => key.as_str());
                Fetched::from_entry(entry, CacheStatus::Fresh)
            }
            Some(entry) => {
                metric!(counter("caches.stale.hit") += 1, "cache" => key.as_str());
                tracing::debug!(key = %key, age = ?entry.age(), "Serving stale entry");
                // The refresh keeps running on its own task.
                drop(self.start_refresh(key, policy, produce));
                Fetched::from_entry(entry, CacheStatus::Stale)
            }
            None => {
                metric!(counter("caches.miss") += 1, "cache" => key.as_str());
                match self.start_refresh(key, policy, produce).await {
                    RefreshOutcome::Success(value) => Fetched {
                        value,
                        status: CacheStatus::Live,
                        stored_at: Some(Utc::now()),
                    },
                    RefreshOutcome::Failure(err) => {
                        if let Some(entry) = self.store.get::<T>(key) {
                            tracing::debug!(key = %key, "Serving entry written by a concurrent refresh");
                            return Fetched::from_entry(entry, CacheStatus::Stale);
                        }

                        metric!(counter("caches.fallback") += 1, "cache" => key.as_str());
                        tracing::warn!(
                            error = &err as &dyn std::error::Error,
                            key = %key,
                            "No data available, serving fallback",
                        );
                        Fetched {
                            value: fallback,
                            status: CacheStatus::Fallback,
                            stored_at: None,
                        }
                    }
                }
            }
        }
    }

    /// Refreshes `key` regardless of the state of its entry, joining a running refresh if any.
    pub async fn refresh<P, F>(
        &self,
        key: &CacheKey,
        policy: RefreshPolicy,
        produce: P,
    ) -> RefreshOutcome<T>
    where
        P: FnOnce() -> F,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.start_refresh(key, policy, produce).await
    }

    fn start_refresh<P, F>(&self, key: &CacheKey, policy: RefreshPolicy, produce: P) -> InFlight<T>
    where
        P: FnOnce() -> F,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task_key = key.clone();
        self.coalescer.run_exclusive(key, move || {
            let produce = produce();
            async move { run_refresh(&store, &task_key, policy, produce).await }
        })
    }
}
