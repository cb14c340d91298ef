//! Persistent, generation-scoped media cache.
//!
//! Every generation (a version tag such as `reelfeed-cache-v1`) is its own
//! `cacache` directory under a shared root:
//!
//! ```text
//! <root>/
//!   reelfeed-cache-v1/   <- current generation, the only one written to
//!   reelfeed-cache-v0/   <- stale, removed by MediaCache::activate()
//! ```
//!
//! `cacache` writes content to a temporary file and only then appends the
//! index entry, so a reader sees either the previous entry for a key or the
//! complete new one, never a partial body.  The last committed write for a
//! key wins.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

use crate::error::StorageError;

/// A cached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub stored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Handle on the current cache generation.
#[derive(Debug)]
pub struct MediaCache {
    root: PathBuf,
    generation: String,
    dir: PathBuf,
    stats: CacheStats,
}

impl MediaCache {
    /// Open (creating if needed) `generation` under `root`.  Idempotent.
    pub async fn open(root: impl Into<PathBuf>, generation: &str) -> Result<Self, StorageError> {
        validate_generation(generation)?;
        let root = root.into();
        let dir = root.join(generation);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(generation, dir = %dir.display(), "cache generation opened");

        Ok(Self {
            root,
            generation: generation.to_string(),
            dir,
            stats: CacheStats::default(),
        })
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Directory holding the current generation.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Look up `key`.  `Ok(None)` is a genuine miss.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let Some(meta) = cacache::metadata(&self.dir, key).await? else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key, "cache miss");
            return Ok(None);
        };

        // Read by integrity so the body always matches the index entry we
        // just resolved, even if another writer commits the same key now.
        let bytes = match cacache::read_hash(&self.dir, &meta.integrity).await {
            Ok(bytes) => bytes,
            Err(cacache::Error::EntryNotFound(_, _)) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache index points at missing content");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        trace!(key, bytes = bytes.len(), "cache hit");

        let content_type = meta
            .metadata
            .get("content_type")
            .and_then(|v| v.as_str())
            .map(String::from);
        let stored_at = i64::try_from(meta.time)
            .ok()
            .and_then(DateTime::from_timestamp_millis);

        Ok(Some(CacheEntry {
            bytes,
            content_type,
            stored_at,
        }))
    }

    /// Whether `key` has an entry, without reading its body.
    pub async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(cacache::metadata(&self.dir, key).await?.is_some())
    }

    /// Store `bytes` under `key`, replacing any previous entry.  Returns
    /// only once the entry is committed.
    pub async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut writer = cacache::WriteOpts::new()
            .size(bytes.len())
            .metadata(json!({ "content_type": content_type }))
            .open(&self.dir, key)
            .await?;
        writer.write_all(bytes).await?;
        writer.commit().await?;

        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key, bytes = bytes.len(), generation = %self.generation, "cache write");
        Ok(())
    }

    /// Names of every generation present under the root, sorted.
    pub async fn generations(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                match entry.file_name().to_str() {
                    Some(name) if validate_generation(name).is_ok() => names.push(name.to_string()),
                    _ => {}
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove every entry of a generation other than the current one.
    pub async fn delete_generation(&self, name: &str) -> Result<(), StorageError> {
        validate_generation(name)?;
        if name == self.generation {
            return Err(StorageError::ActiveGeneration(name.to_string()));
        }
        match tokio::fs::remove_dir_all(self.root.join(name)).await {
            Ok(()) => {
                info!(generation = name, "deleted stale cache generation");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Make this generation the only one: delete all others.
    ///
    /// Must complete before the generation takes writes, otherwise a stale
    /// generation could outlive the version bump.  Returns the deleted names.
    pub async fn activate(&self) -> Result<Vec<String>, StorageError> {
        let mut deleted = Vec::new();
        for name in self.generations().await? {
            if name != self.generation {
                self.delete_generation(&name).await?;
                deleted.push(name);
            }
        }
        info!(generation = %self.generation, stale = deleted.len(), "cache generation active");
        Ok(deleted)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }
}

fn validate_generation(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidGeneration(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
