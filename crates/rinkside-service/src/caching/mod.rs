//! # Rinkside caching infrastructure
//!
//! Every piece of data Rinkside serves originates from a slow, rate-limited and sometimes flaky
//! upstream site. This module turns those upstreams into something that answers quickly and
//! almost never fails, using a stale-while-revalidate (SWR) policy with request coalescing.
//!
//! ## Components
//!
//! - The [`CacheStore`] persists one JSON file per [`CacheKey`], containing the value, the time
//!   it was written, and its time-to-live. It has no policy of its own.
//! - The [`Coalescer`] keeps a registry of in-flight refreshes, so that there is at most one
//!   running refresh per key no matter how many callers ask for it concurrently.
//! - The refresh executor ([`run_refresh`]) invokes a producer, and writes successful results
//!   back to the store before anybody waiting on the refresh observes them.
//! - The [`Cacher`] is the policy engine tying the above together.
//!
//! ## Request flow
//!
//! A [`Cacher::request`] goes through these steps:
//!
//! - The entry is read from the store.
//! - If it is *fresh* (`now - stored_at <= ttl`), it is returned right away. The producer is not
//!   involved at all.
//! - If it is *stale*, it is also returned right away. Additionally, a refresh is started in the
//!   background, or joined if one is already running for the key. The caller never waits for it.
//! - If there is no entry at all, the caller has to wait for a (possibly shared) refresh.
//!   Should that refresh fail, the store is consulted once more, ignoring the TTL, as another
//!   refresh may have written an entry in the meantime. Only then the caller-provided fallback
//!   value is returned.
//!
//! The read path never returns an error. Callers always receive the best value available, in the
//! order fresh, stale, fallback, and can inspect the [`CacheStatus`] of the [`Fetched`] value to
//! find out which one it was.
//!
//! ## Failures
//!
//! - A failing producer never touches the store. Whatever was stored before, stale or not, stays
//!   available for future requests.
//! - An empty producer result is treated as a failure for resources configured with
//!   [`RefreshPolicy::cache_empty`] set to `false`, so that a transient empty scrape does not
//!   replace good data.
//! - A corrupted cache file is removed when it is read, and treated as if it did not exist.
//! - A failure to write the cache file is logged. The refreshed value is still handed to all
//!   waiting callers, it just does not survive a restart.
//!
//! There is no timeout in this module. A producer that never resolves holds the in-flight slot
//! of its key forever, so producers are expected to bound their own I/O.
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field holding the cache key:
//!
//! - `caches.access`: All requests.
//! - `caches.fresh.hit`, `caches.stale.hit`, `caches.miss`: The state the entry was found in.
//! - `caches.coalesced`: Refreshes that were joined instead of started.
//! - `caches.computation`: Actual producer invocations.
//! - `caches.refresh`: Finished refreshes, tagged with `status`.
//! - `caches.fallback`: Requests answered with the fallback value.
//! - `caches.file.write`, `caches.file.write_error`, `caches.file.corrupt`: Store activity.

mod cache_error;
mod cache_key;
mod cacher;
mod coalescer;
mod fs;
mod refresh;
mod value;
#[cfg(test)]
mod tests;

pub use cache_error::{CacheError, RefreshError};
pub use cache_key::{CacheKey, CacheKeyError};
pub use cacher::{CacheStatus, Cacher, Fetched};
pub use coalescer::{Coalescer, InFlight};
pub use fs::{CacheEntry, CacheStore, DEFAULT_CACHE_DURATION};
pub use refresh::{RefreshOutcome, RefreshPolicy, run_refresh};
pub use value::CacheValue;
