use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};

use super::{CacheKey, RefreshError, RefreshOutcome};
use crate::utils::defer::CallOnDrop;

type SharedOutcome<T> = Shared<BoxFuture<'static, RefreshOutcome<T>>>;
type InFlightMap<T> = Arc<Mutex<HashMap<CacheKey, SharedOutcome<T>>>>;

/// Deduplicates concurrent refreshes of the same key.
///
/// Each refresh runs in its own spawned task, independent of the callers waiting for it. The
/// registry slot of a key is cleared by the task itself once the refresh settles, which happens
/// before any joined caller observes the result. A refresh started after that is a new one.
pub struct Coalescer<T> {
    in_flight: InFlightMap<T>,
}

impl<T> Clone for Coalescer<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Default::default(),
        }
    }
}

impl<T> fmt::Debug for Coalescer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &lock(&self.in_flight).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The map is valid even if a holder panicked.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Coalescer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently running for `key`.
    pub fn in_flight(&self, key: &CacheKey) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    /// The number of refreshes currently running.
    pub fn len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    /// Joins the running refresh of `key`, or spawns a new one from `start`.
    ///
    /// `start` is only invoked when there is no refresh in flight, while the registry is
    /// locked, so it must not block. The returned [`InFlight`] can be awaited for the outcome,
    /// or dropped without affecting the refresh.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run_exclusive<S, F>(&self, key: &CacheKey, start: S) -> InFlight<T>
    where
        S: FnOnce() -> F,
        F: Future<Output = RefreshOutcome<T>> + Send + 'static,
    {
        let mut in_flight = lock(&self.in_flight);
        if let Some(refresh) = in_flight.get(key) {
            metric!(counter("caches.coalesced") += 1, "cache" => key.as_str());
            tracing::trace!(key = %key, "Joining in-flight refresh");
            return InFlight {
                inner: refresh.clone(),
                joined: true,
            };
        }

        // Nothing is registered yet if `start` unwinds.
        let refresh = start();

        let done_token = {
            let key = key.clone();
            let in_flight = Arc::clone(&self.in_flight);
            CallOnDrop::new(move || {
                lock(&in_flight).remove(&key);
            })
        };

        let task = tokio::spawn(async move {
            let _done_token = done_token;
            refresh.await
        });

        let task_key = key.clone();
        let refresh = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        key = %task_key,
                        "Refresh task did not complete",
                    );
                    RefreshOutcome::Failure(RefreshError::Panicked)
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(key.clone(), refresh.clone());
        InFlight {
            inner: refresh,
            joined: false,
        }
    }
}

/// A handle to a running refresh, resolving to its outcome.
pub struct InFlight<T> {
    inner: SharedOutcome<T>,
    joined: bool,
}

impl<T> InFlight<T> {
    /// Whether this handle joined an already running refresh instead of starting it.
    pub fn is_joined(&self) -> bool {
        self.joined
    }
}

impl<T> fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> Future for InFlight<T> {
    type Output = RefreshOutcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}
