//! Cache manager for persisting datasets and markers to disk
//!
//! Provides a `CacheManager` that stores serializable data as JSON files stamped
//! with their write time. The manager never decides whether an entry is fresh;
//! callers pass the maximum age they tolerate.

use chrono::{DateTime, Duration, Utc};
use serde::de::IgnoredAny;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the cache store
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry exists for the key
    #[error("no cache entry for '{0}'")]
    NotFound(String),

    /// The entry exists but does not decode to the requested type
    #[error("cache entry '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Encoding the payload failed
    #[error("failed to encode cache entry '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem error while reading or writing
    #[error("cache I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Wrapper struct for cached data stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    /// When the data was cached
    cached_at: DateTime<Utc>,
    /// The cached data
    data: T,
}

/// Envelope header, read without decoding the payload
#[derive(Debug, Deserialize)]
struct EntryHeader {
    cached_at: DateTime<Utc>,
    #[allow(dead_code)]
    data: IgnoredAny,
}

/// Result of reading from cache, including the write timestamp
#[derive(Debug)]
pub struct CachedData<T> {
    /// The cached data
    pub data: T,
    /// When the data was written
    pub cached_at: DateTime<Utc>,
}

/// Manages reading and writing cached data to disk
///
/// Each key maps to `<dir>/<key>.json`. Writes go to a temporary sibling file
/// which is then renamed over the target, so a reader sees either the previous
/// payload or the new one.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl CacheManager {
    /// Creates a new CacheManager rooted at the given directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Directory backing this store
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to a cache file for the given key
    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    fn io_error(key: &str, source: io::Error) -> CacheError {
        CacheError::Io {
            key: key.to_string(),
            source,
        }
    }

    /// Whether an entry exists for the key
    pub fn exists(&self, key: &str) -> bool {
        self.cache_path(key).is_file()
    }

    /// Write timestamp of the entry, or `None` when it is missing or unreadable
    pub fn cached_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let content = fs::read(self.cache_path(key)).ok()?;
        let header: EntryHeader = serde_json::from_slice(&content).ok()?;
        Some(header.cached_at)
    }

    /// Age of the entry relative to `now`
    pub fn age_at(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.cached_at(key).map(|cached_at| now - cached_at)
    }

    /// Whether the entry is older than `max_age`. Missing entries count as expired.
    pub fn expired(&self, key: &str, max_age: Duration) -> bool {
        self.expired_at(key, max_age, Utc::now())
    }

    /// Same as [`CacheManager::expired`], evaluated at `now`
    pub fn expired_at(&self, key: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
        match self.age_at(key, now) {
            Some(age) => age > max_age,
            None => true,
        }
    }

    /// Writes data to the cache, stamped with the current time
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<(), CacheError> {
        self.write_at(key, data, Utc::now())
    }

    /// Writes data to the cache, stamped with `cached_at`
    pub fn write_at<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        cached_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| Self::io_error(key, e))?;

        let entry = CacheEntry { cached_at, data };
        let json = serde_json::to_vec(&entry).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;

        let target = self.cache_path(key);
        let tmp = self
            .cache_dir
            .join(format!(".{}.json.tmp-{}", key, std::process::id()));

        if let Err(e) = fs::write(&tmp, &json).and_then(|_| fs::rename(&tmp, &target)) {
            let _ = fs::remove_file(&tmp);
            return Err(Self::io_error(key, e));
        }

        Ok(())
    }

    /// Reads data from the cache
    ///
    /// A missing entry is `CacheError::NotFound`. An entry that cannot be decoded
    /// into `T` is `CacheError::Corrupt`; it is never reported as missing.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<CachedData<T>, CacheError> {
        let content = match fs::read(self.cache_path(key)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(key.to_string()))
            }
            Err(e) => return Err(Self::io_error(key, e)),
        };

        let entry: CacheEntry<T> =
            serde_json::from_slice(&content).map_err(|source| CacheError::Corrupt {
                key: key.to_string(),
                source,
            })?;

        Ok(CachedData {
            data: entry.data,
            cached_at: entry.cached_at,
        })
    }
}
