//! L2 - on-disk approximate-nearest-neighbour tier
//!
//! Middle tier. Entries are held in memory for serving but backed by a
//! durable snapshot: the vector shard goes through [`DiskVectorIndex`], the
//! entry bodies through an `entries.json` snapshot written with the same
//! write-then-rename discipline. Eviction is LRU on `last_access`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::search::{
    DiskVectorIndex, DurableVectorIndex, VectorIndex, VectorIndexConfig, VectorIndexError,
};

use super::entry::CacheEntry;

/// Shard file for the vector index inside the `l2/` directory
const INDEX_SHARD: &str = "index.json";

/// Snapshot file for entry bodies inside the `l2/` directory
const ENTRIES_SNAPSHOT: &str = "entries.json";

#[derive(Debug, Serialize, Deserialize)]
struct EntriesSnapshot {
    entries: Vec<CacheEntry>,
}

/// On-disk LRU cache backing the L2 tier
pub struct L2Cache {
    entries: HashMap<String, CacheEntry>,
    index: DiskVectorIndex,
    snapshot_path: PathBuf,
    max_size: usize,
}

impl L2Cache {
    /// Open the L2 tier rooted at `dir`, loading any previous snapshot
    pub fn open(
        dir: impl AsRef<Path>,
        max_size: usize,
        dimensions: usize,
    ) -> Result<Self, VectorIndexError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let index = DiskVectorIndex::open(dir.join(INDEX_SHARD), VectorIndexConfig { dimensions })?;
        let snapshot_path = dir.join(ENTRIES_SNAPSHOT);

        let mut entries = HashMap::new();
        if snapshot_path.exists() {
            let raw = fs::read_to_string(&snapshot_path)?;
            let snapshot: EntriesSnapshot = serde_json::from_str(&raw)?;
            for entry in snapshot.entries {
                entries.insert(entry.key.clone(), entry);
            }
        }

        Ok(Self {
            entries,
            index,
            snapshot_path,
            max_size,
        })
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current capacity bound
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Adjust the capacity bound; evicts immediately when shrinking
    pub fn set_max_size(&mut self, max_size: usize) -> Vec<CacheEntry> {
        self.max_size = max_size;
        self.evict_over_capacity()
    }

    /// Insert an entry, honouring per-key `stored_at` monotonicity.
    /// Returns evicted entries (demoted toward L3 by the caller).
    pub fn insert(&mut self, entry: CacheEntry) -> Vec<CacheEntry> {
        if let Some(resident) = self.entries.get(&entry.key) {
            if resident.metadata.stored_at > entry.metadata.stored_at {
                return Vec::new();
            }
        }

        let _ = self.index.insert(&entry.key, &entry.vector);
        self.entries.insert(entry.key.clone(), entry);
        self.evict_over_capacity()
    }

    /// Read an entry, bumping access bookkeeping
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        entry.touch(Utc::now());
        Some(entry.clone())
    }

    /// Read without touching bookkeeping (sync coordinator path)
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        if self.index.contains(key) {
            let _ = self.index.remove(key);
        }
        self.entries.remove(key)
    }

    /// Similarity search across resident entries
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        self.index.query(query, k).unwrap_or_default()
    }

    /// Iterate resident entries (sync coordinator path)
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Flush the vector shard and entry snapshot to disk
    pub fn persist(&self) -> Result<(), VectorIndexError> {
        self.index.persist()?;

        let snapshot = EntriesSnapshot {
            entries: self.entries.values().cloned().collect(),
        };
        let serialized = serde_json::to_string(&snapshot)?;
        let tmp = self.snapshot_path.with_extension("tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }

    /// LRU eviction: drop the least-recently-read entries until within
    /// capacity. Ties broken by key order for determinism.
    fn evict_over_capacity(&mut self) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_size {
            let victim_key = self
                .entries
                .values()
                .min_by(|a, b| {
                    a.last_access
                        .cmp(&b.last_access)
                        .then_with(|| a.key.cmp(&b.key))
                })
                .map(|e| e.key.clone());

            match victim_key {
                Some(key) => {
                    if let Some(entry) = self.remove(&key) {
                        evicted.push(entry);
                    }
                }
                None => break,
            }
        }
        evicted
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::entry::EntryMetadata;
    use chrono::Duration;

    fn entry(key: &str, last_access_offset_s: i64) -> CacheEntry {
        let mut e = CacheEntry::new(
            key,
            vec![1.0, 0.0, 0.0],
            EntryMetadata {
                value: serde_json::json!({ "k": key }),
                stored_at: Utc::now(),
                version: 1,
            },
        );
        e.last_access = Utc::now() + Duration::seconds(last_access_offset_s);
        e
    }

    #[test]
    fn test_lru_eviction_prefers_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = L2Cache::open(dir.path(), 2, 3).unwrap();

        cache.insert(entry("stale", -100));
        cache.insert(entry("fresh", 0));

        let evicted = cache.insert(entry("new", 0));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "stale");
    }

    #[test]
    fn test_persist_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut cache = L2Cache::open(dir.path(), 10, 3).unwrap();
            cache.insert(entry("a", 0));
            cache.insert(entry("b", 0));
            cache.persist().unwrap();
        }

        let mut reloaded = L2Cache::open(dir.path(), 10, 3).unwrap();
        assert_eq!(reloaded.len(), 2);
        let got = reloaded.get("a").unwrap();
        assert_eq!(got.metadata.value, serde_json::json!({ "k": "a" }));

        let hits = reloaded.search(&[1.0, 0.0, 0.0], 5);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_stale_write_loses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = L2Cache::open(dir.path(), 10, 3).unwrap();

        let mut newer = entry("a", 0);
        newer.metadata.stored_at = Utc::now() + Duration::seconds(60);
        cache.insert(newer);
        cache.insert(entry("a", 0));

        assert!(cache.peek("a").unwrap().metadata.stored_at > Utc::now());
    }
}
