//! L1 - in-memory vector cache
//!
//! Fastest tier. Entries live in a hash map with an in-memory vector index
//! alongside; eviction is LFU on `access_count`. Demotion happens only here:
//! evicted entries are returned to the caller, which hands them to L2.

use std::collections::HashMap;

use chrono::Utc;

use crate::search::{FlatVectorIndex, VectorIndex, VectorIndexConfig};

use super::entry::CacheEntry;

/// In-memory LFU cache backing the L1 tier
pub struct L1Cache {
    entries: HashMap<String, CacheEntry>,
    index: FlatVectorIndex,
    max_size: usize,
}

impl L1Cache {
    /// Create an empty L1 cache
    pub fn new(max_size: usize, dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            index: FlatVectorIndex::new(VectorIndexConfig { dimensions }),
            max_size,
        }
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
    ///
    /// Returns entries evicted to make room. An insert older than the
    /// resident entry is dropped silently (the resident write wins).
    pub fn insert(&mut self, entry: CacheEntry) -> Vec<CacheEntry> {
        if let Some(resident) = self.entries.get(&entry.key) {
            if resident.metadata.stored_at > entry.metadata.stored_at {
                return Vec::new();
            }
        }

        // Index insert only fails on dimension mismatch, which the fabric
        // has already validated
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

    /// LFU eviction: drop the least-accessed entries until within capacity.
    /// Ties broken by older `last_access`, then key order for determinism.
    fn evict_over_capacity(&mut self) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_size {
            let victim_key = self
                .entries
                .values()
                .min_by(|a, b| {
                    a.access_count
                        .cmp(&b.access_count)
                        .then_with(|| a.last_access.cmp(&b.last_access))
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
    use chrono::{Duration, Utc};

    fn entry(key: &str, stored_at_offset_s: i64) -> CacheEntry {
        CacheEntry::new(
            key,
            vec![1.0, 0.0, 0.0],
            EntryMetadata {
                value: serde_json::json!({ "k": key }),
                stored_at: Utc::now() + Duration::seconds(stored_at_offset_s),
                version: 1,
            },
        )
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = L1Cache::new(10, 3);
        cache.insert(entry("a", 0));

        let got = cache.get("a").unwrap();
        assert_eq!(got.access_count, 1);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_lfu_eviction_prefers_cold_entries() {
        let mut cache = L1Cache::new(2, 3);
        cache.insert(entry("hot", 0));
        cache.insert(entry("cold", 0));

        // Heat up "hot"
        for _ in 0..5 {
            cache.get("hot");
        }

        let evicted = cache.insert(entry("new", 0));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "cold");
        assert!(cache.peek("hot").is_some());
    }

    #[test]
    fn test_stale_write_loses() {
        let mut cache = L1Cache::new(10, 3);
        cache.insert(entry("a", 10));
        cache.insert(entry("a", -10));

        let resident = cache.peek("a").unwrap();
        assert!(resident.metadata.stored_at > Utc::now());
    }

    #[test]
    fn test_shrink_evicts_immediately() {
        let mut cache = L1Cache::new(4, 3);
        for key in ["a", "b", "c", "d"] {
            cache.insert(entry(key, 0));
        }
        let evicted = cache.set_max_size(2);
        assert_eq!(evicted.len(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_search_finds_resident_keys() {
        let mut cache = L1Cache::new(10, 3);
        cache.insert(entry("a", 0));
        let hits = cache.search(&[1.0, 0.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }
}
