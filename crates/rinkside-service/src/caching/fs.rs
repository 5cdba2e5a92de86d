use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{CacheError, CacheKey};

/// The time-to-live of entries that were written without one.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(24 * 3600);

/// The directory inside the cache root holding partially written entries.
const TMP_DIR: &str = ".tmp";

/// A value loaded from the [`CacheStore`], along with the time it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// The age of the entry at `now`.
    ///
    /// Entries with a `stored_at` in the future, which can happen after the system clock was
    /// adjusted, have an age of zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or_default()
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// Whether the entry is still within its TTL at `now`. The TTL boundary itself is fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) <= self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// The on-disk representation of an entry.
#[derive(Serialize)]
struct RecordRef<'a, T> {
    timestamp: DateTime<Utc>,
    data: &'a T,
    #[serde(rename = "cacheDuration")]
    cache_duration: u64,
}

#[derive(Deserialize)]
struct Record<T> {
    timestamp: DateTime<Utc>,
    data: T,
    #[serde(rename = "cacheDuration", default)]
    cache_duration: Option<u64>,
}

/// A directory of cache entries, one JSON file per [`CacheKey`].
///
/// Writes go to a temporary file inside the `.tmp` subdirectory first and are then moved into
/// place, so a reader only ever sees complete entries. Corrupted entries are removed on read.
#[derive(Debug)]
pub struct CacheStore {
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl CacheStore {
    /// Opens the store, creating its directory if needed.
    ///
    /// Leftovers of interrupted writes in the temporary directory are removed.
    pub fn open(cache_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        let tmp_dir = cache_dir.join(TMP_DIR);
        fs::create_dir_all(&cache_dir)?;

        let store = Self { cache_dir, tmp_dir };
        store.clear_tmp()?;
        Ok(store)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The file holding the entry for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_str())
    }

    fn clear_tmp(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.tmp_dir) {
            Ok(()) => tracing::debug!(path = %self.tmp_dir.display(), "Cleared tmp directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.tmp_dir)
    }

    /// Stores `value` under `key`, stamped with the current time.
    pub fn put<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.put_at(key, value, ttl, Utc::now())
    }

    /// Stores `value` under `key` with an explicit write time, replacing any previous entry.
    ///
    /// The timestamp is truncated to milliseconds, which is the precision of the file format.
    pub fn put_at<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        stored_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let record = RecordRef {
            timestamp: stored_at.trunc_subsecs(3),
            data: value,
            cache_duration: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };

        let mut temp_file = self.tempfile()?;
        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &record)?;
            writer.flush()?;
        }

        let path = self.entry_path(key);
        persist_tempfile(temp_file, &path)?;

        metric!(counter("caches.file.write") += 1, "cache" => key.as_str());
        tracing::trace!(key = %key, path = %path.display(), "Wrote cache entry");
        Ok(())
    }

    /// Loads the entry for `key`.
    ///
    /// Returns `None` if there is no entry, or if it cannot be read. Entries that cannot be
    /// deserialized into `T` are corrupted and get deleted. Other IO errors are logged and leave
    /// the file alone.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let path = self.entry_path(key);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    key = %key,
                    path = %path.display(),
                    "Failed to read cache file",
                );
                return None;
            }
        };

        match serde_json::from_slice::<Record<T>>(&contents) {
            Ok(record) => Some(CacheEntry {
                key: key.clone(),
                value: record.data,
                stored_at: record.timestamp,
                ttl: record
                    .cache_duration
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CACHE_DURATION),
            }),
            Err(e) => {
                tracing::warn!(
                    error = &e as &dyn std::error::Error,
                    key = %key,
                    "Removing corrupted cache file",
                );
                metric!(counter("caches.file.corrupt") += 1, "cache" => key.as_str());
                purge(&path);
                None
            }
        }
    }

    fn tempfile(&self) -> io::Result<NamedTempFile> {
        // Someone may have removed the directory while we are running.
        if let Err(e) = fs::create_dir_all(&self.tmp_dir) {
            sentry::with_scope(
                |scope| scope.set_extra("path", self.tmp_dir.display().to_string().into()),
                || tracing::error!("Failed to create tmp directory: {:?}", e),
            );
            return Err(e);
        }
        tempfile::Builder::new()
            .prefix("tmp")
            .tempfile_in(&self.tmp_dir)
    }
}

fn purge(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!(
            error = &e as &dyn std::error::Error,
            path = %path.display(),
            "Failed to remove corrupted cache file",
        ),
    }
}

fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist entry"))?;

    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(parent) {
            sentry::with_scope(
                |scope| scope.set_extra("path", parent.display().to_string().into()),
                || tracing::error!("Failed to create cache directory: {:?}", e),
            );
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                sentry::with_scope(
                    |scope| scope.set_extra("path", cache_path.display().to_string().into()),
                    || tracing::error!("Failed to persist cache file: {:?}", err),
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}
