use std::io;

use thiserror::Error;

/// An error writing an entry to the [`CacheStore`](super::CacheStore).
///
/// Reads never produce this error. Missing, unreadable and corrupted entries are all reported
/// as absent instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The entry could not be written to or moved into the cache directory.
    #[error("failed to write cache file")]
    Io(#[from] io::Error),
    /// The value could not be serialized.
    #[error("failed to serialize cache entry")]
    Serialization(#[from] serde_json::Error),
}

/// The reason a refresh did not produce a new value.
///
/// This is shared between all callers joined on the same refresh, hence it only carries the
/// rendered error message of the producer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The producer returned an error.
    #[error("producer failed: {0}")]
    Producer(String),
    /// The producer returned an empty value for a resource that does not cache those.
    #[error("producer returned an empty result")]
    EmptyResult,
    /// The refresh task panicked or was cancelled before it settled.
    #[error("refresh task panicked or was cancelled")]
    Panicked,
}

impl RefreshError {
    /// Renders the full error chain of a producer error.
    pub fn from_producer(err: &anyhow::Error) -> Self {
        Self::Producer(format!("{err:#}"))
    }
}
