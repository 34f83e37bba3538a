use std::fmt::Debug;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::data::Value;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache record is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Fingerprint-keyed store of computed artifacts.
///
/// Implementations must be safe to share between threads and between
/// scripts. A failing cache never fails an evaluation: callers treat read
/// errors as misses and write errors as no-ops.
pub trait Cache: Debug + Send + Sync {
    fn get(&self, key: &Fingerprint) -> Result<Option<Arc<Value>>, CacheError>;
    fn put(&self, key: &Fingerprint, artifact: &Arc<Value>) -> Result<(), CacheError>;
    fn stats(&self) -> CacheStats;
    fn clear(&self) -> Result<(), CacheError>;
}

/// Stores nothing; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

/// In-process cache bounded by the summed size of its artifacts.
#[derive(Debug)]
pub struct MemoryCache {
    max_bytes: u64,
    inner: Mutex<MemoryCacheInner>,
}

#[derive(Debug)]
struct MemoryCacheInner {
    entries: LruCache<Fingerprint, MemoryEntry>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug)]
struct MemoryEntry {
    artifact: Arc<Value>,
    size: u64,
}

impl Cache for NullCache {
    fn get(&self, _key: &Fingerprint) -> Result<Option<Arc<Value>>, CacheError> {
        Ok(None)
    }
    fn put(&self, _key: &Fingerprint, _artifact: &Arc<Value>) -> Result<(), CacheError> {
        Ok(())
    }
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
    fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

impl MemoryCache {
    pub fn new(max_bytes: u64) -> Self {
        MemoryCache {
            max_bytes,
            inner: Mutex::new(MemoryCacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.inner.lock().entries.contains(key)
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &Fingerprint) -> Result<Option<Arc<Value>>, CacheError> {
        let mut inner = self.inner.lock();
        let artifact = inner.entries.get(key).map(|entry| entry.artifact.clone());
        match artifact {
            Some(_) => inner.hits += 1,
            None => inner.misses += 1,
        }

        Ok(artifact)
    }

    fn put(&self, key: &Fingerprint, artifact: &Arc<Value>) -> Result<(), CacheError> {
        let size = artifact.byte_size() as u64;
        let mut inner = self.inner.lock();

        if size > self.max_bytes {
            debug!(
                "Artifact {} of {} bytes exceeds the cache budget of {} bytes",
                key, size, self.max_bytes
            );
            if let Some(previous) = inner.entries.pop(key) {
                inner.total_bytes -= previous.size;
            }
            return Ok(());
        }

        let entry = MemoryEntry {
            artifact: artifact.clone(),
            size,
        };
        if let Some(previous) = inner.entries.put(*key, entry) {
            inner.total_bytes -= previous.size;
        }
        inner.total_bytes += size;

        while inner.total_bytes > self.max_bytes {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_bytes -= evicted.size;
            inner.evictions += 1;
            debug!("Evicted {} ({} bytes) from memory cache", evicted_key, evicted.size);
        }

        Ok(())
    }

    fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;

        Ok(())
    }
}
