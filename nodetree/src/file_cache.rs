use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CacheError, CacheStats};
use crate::data::Value;
use crate::fingerprint::Fingerprint;

const RECORD_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// Persistent cache storing one JSON record per fingerprint in a directory.
///
/// Records are written to a temporary file and renamed into place, so
/// concurrent readers in other processes see either nothing or a complete
/// record. The byte budget is enforced over the records this process knows
/// about; the index is rebuilt from the directory on open, oldest first.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    max_bytes: u64,
    index: Mutex<FileIndex>,
}

#[derive(Debug)]
struct FileIndex {
    entries: LruCache<Fingerprint, u64>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug, Deserialize)]
struct CacheRecord {
    fingerprint: Fingerprint,
    created_secs: u64,
    artifact: Value,
}

#[derive(Debug, Serialize)]
struct CacheRecordRef<'a> {
    fingerprint: &'a Fingerprint,
    created_secs: u64,
    artifact: &'a Value,
}

impl FileCache {
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut found: Vec<(SystemTime, Fingerprint, u64)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(fingerprint) = record_fingerprint(&path) else {
                continue;
            };
            let metadata = entry.metadata()?;
            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            found.push((modified, fingerprint, metadata.len()));
        }
        found.sort_by_key(|(modified, _, _)| *modified);

        let mut index = FileIndex {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        };
        for (_, fingerprint, size) in found {
            index.entries.put(fingerprint, size);
            index.total_bytes += size;
        }

        info!(
            "Opened file cache at {:?} with {} records, {} of {} bytes used",
            dir,
            index.entries.len(),
            index.total_bytes,
            max_bytes
        );

        let cache = FileCache {
            dir,
            max_bytes,
            index: Mutex::new(index),
        };
        cache.evict(&mut cache.index.lock());

        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.to_hex(), RECORD_EXTENSION))
    }

    fn evict(&self, index: &mut FileIndex) {
        while index.total_bytes > self.max_bytes {
            let Some((key, size)) = index.entries.pop_lru() else {
                break;
            };
            index.total_bytes -= size;
            index.evictions += 1;

            match fs::remove_file(self.record_path(&key)) {
                Ok(()) => debug!("Evicted cache record {} ({} bytes)", key, size),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove cache record {}: {}", key, err),
            }
        }
    }

    fn forget(&self, index: &mut FileIndex, key: &Fingerprint) {
        if let Some(size) = index.entries.pop(key) {
            index.total_bytes -= size;
        }
    }
}

fn record_fingerprint(path: &Path) -> Option<Fingerprint> {
    if path.extension()? != RECORD_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl Cache for FileCache {
    fn get(&self, key: &Fingerprint) -> Result<Option<Arc<Value>>, CacheError> {
        let path = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let mut index = self.index.lock();
                self.forget(&mut index, key);
                index.misses += 1;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let record: CacheRecord = serde_json::from_slice(&bytes)?;
        if record.fingerprint != *key {
            warn!("Cache record {:?} holds {}, ignoring", path, record.fingerprint);
            self.index.lock().misses += 1;
            return Ok(None);
        }

        // refresh the age other processes see when they rebuild their index
        if let Err(err) = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|file| file.set_modified(SystemTime::now()))
        {
            debug!("Failed to touch cache record {:?}: {}", path, err);
        }

        let mut index = self.index.lock();
        index.hits += 1;
        if index.entries.get(key).is_none() {
            // written by another process
            let size = bytes.len() as u64;
            index.entries.put(*key, size);
            index.total_bytes += size;
            self.evict(&mut index);
        }

        debug!(
            "Loaded cache record {} created at {}",
            key, record.created_secs
        );

        Ok(Some(Arc::new(record.artifact)))
    }

    fn put(&self, key: &Fingerprint, artifact: &Arc<Value>) -> Result<(), CacheError> {
        let record = CacheRecordRef {
            fingerprint: key,
            created_secs: now_secs(),
            artifact,
        };
        let bytes = serde_json::to_vec(&record)?;
        let size = bytes.len() as u64;

        if size > self.max_bytes {
            debug!(
                "Record {} of {} bytes exceeds the cache budget of {} bytes",
                key, size, self.max_bytes
            );
            return Ok(());
        }

        let temp_path = self
            .dir
            .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        fs::write(&temp_path, &bytes)?;
        if let Err(err) = fs::rename(&temp_path, self.record_path(key)) {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }

        let mut index = self.index.lock();
        if let Some(previous) = index.entries.put(*key, size) {
            index.total_bytes -= previous;
        }
        index.total_bytes += size;
        self.evict(&mut index);

        Ok(())
    }

    fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            entries: index.entries.len(),
            total_bytes: index.total_bytes,
            max_bytes: self.max_bytes,
            hits: index.hits,
            misses: index.misses,
            evictions: index.evictions,
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if record_fingerprint(&path).is_some() {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        index.entries.clear();
        index.total_bytes = 0;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::test_utils::unique_test_dir;

    use super::*;
    use crate::param::ResolvedParams;

    fn key(name: &str) -> Fingerprint {
        Fingerprint::compute(name, &ResolvedParams::default(), false, &[])
    }

    #[test]
    fn records_survive_reopen() -> anyhow::Result<()> {
        let dir = unique_test_dir("file_cache_reopen");
        let artifact = Arc::new(Value::String("page text".into()));

        {
            let cache = FileCache::open(&dir, 1024 * 1024)?;
            cache.put(&key("a"), &artifact)?;
            assert!(cache.record_path(&key("a")).exists());
        }

        let cache = FileCache::open(&dir, 1024 * 1024)?;
        assert_eq!(cache.stats().entries, 1);
        let loaded = cache.get(&key("a"))?.expect("record persisted");
        assert_eq!(*loaded, *artifact);

        Ok(())
    }

    #[test]
    fn missing_record_is_a_miss() -> anyhow::Result<()> {
        let dir = unique_test_dir("file_cache_missing");
        let cache = FileCache::open(&dir, 1024 * 1024)?;
        cache.put(&key("a"), &Arc::new(Value::Int(1)))?;

        fs::remove_file(cache.record_path(&key("a")))?;

        assert!(cache.get(&key("a"))?.is_none());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().total_bytes, 0);

        Ok(())
    }

    #[test]
    fn corrupt_record_is_an_error() -> anyhow::Result<()> {
        let dir = unique_test_dir("file_cache_corrupt");
        let cache = FileCache::open(&dir, 1024 * 1024)?;
        fs::write(cache.record_path(&key("a")), b"{ not json")?;

        assert!(matches!(cache.get(&key("a")), Err(CacheError::Serde(_))));

        Ok(())
    }

    #[test]
    fn budget_evicts_oldest_records() -> anyhow::Result<()> {
        let dir = unique_test_dir("file_cache_budget");
        let artifact = Arc::new(Value::Bytes(vec![1; 200]));
        let record_size = serde_json::to_vec(&CacheRecordRef {
            fingerprint: &key("a"),
            created_secs: now_secs(),
            artifact: &artifact,
        })?
        .len() as u64;

        // room for two records, with slack for the timestamp width
        let cache = FileCache::open(&dir, record_size * 2 + 8)?;
        cache.put(&key("a"), &artifact)?;
        cache.put(&key("b"), &artifact)?;
        assert!(cache.get(&key("a"))?.is_some());
        cache.put(&key("c"), &artifact)?;

        assert!(cache.record_path(&key("a")).exists());
        assert!(!cache.record_path(&key("b")).exists());
        assert!(cache.record_path(&key("c")).exists());

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 1);
        assert!(stats.total_bytes <= stats.max_bytes);

        Ok(())
    }

    #[test]
    fn reopen_with_smaller_budget_evicts() -> anyhow::Result<()> {
        let dir = unique_test_dir("file_cache_shrink");
        let artifact = Arc::new(Value::Bytes(vec![1; 200]));
        {
            let cache = FileCache::open(&dir, 1024 * 1024)?;
            for name in ["a", "b", "c"] {
                cache.put(&key(name), &artifact)?;
            }
        }

        let cache = FileCache::open(&dir, 10)?;
        assert_eq!(cache.stats().entries, 0);
        assert!(!cache.record_path(&key("a")).exists());

        Ok(())
    }

    #[test]
    fn stray_files_are_ignored() -> anyhow::Result<()> {
        let dir = unique_test_dir("file_cache_stray");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("notes.txt"), b"keep me")?;
        fs::write(dir.join(format!("{}abc", TEMP_PREFIX)), b"partial")?;

        let cache = FileCache::open(&dir, 1024)?;
        assert_eq!(cache.stats().entries, 0);
        cache.clear()?;
        assert!(dir.join("notes.txt").exists());

        Ok(())
    }
}
