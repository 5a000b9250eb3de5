//! Vector index backends
//!
//! Exact cosine scan over dense `f32` vectors. Queries return
//! `(key, similarity)` pairs sorted by descending similarity. The on-disk
//! variant snapshots to a JSON shard with a write-then-rename so a crash
//! mid-persist leaves the previous shard intact.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embeddings::cosine_similarity;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default vector dimensionality when none is declared at construction
pub const DEFAULT_DIMENSIONS: usize = 768;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    /// Vector dimensionality did not match the index
    #[error("Invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions {
        /// Declared index dimensionality
        expected: usize,
        /// Dimensionality of the offending vector
        got: usize,
    },
    /// Key not present in the index
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    /// Persistence failure
    #[error("Persistence failed: {0}")]
    Persistence(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot (de)serialization error
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, VectorIndexError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for a vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    /// Number of dimensions every inserted vector must have
    pub dimensions: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexStats {
    /// Total number of vectors
    pub total_vectors: usize,
    /// Vector dimensions
    pub dimensions: usize,
    /// Estimated memory usage in bytes
    pub memory_bytes: usize,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Nearest-neighbour index over dense `f32` vectors
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a vector under `key`
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()>;

    /// Remove the vector under `key`
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Return up to `k` keys by descending cosine similarity to `vector`
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>>;

    /// Rebuild internal structures from the stored vectors
    fn rebuild(&mut self) -> Result<()>;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    /// Whether the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is indexed
    fn contains(&self, key: &str) -> bool;

    /// Index statistics
    fn stats(&self) -> VectorIndexStats;
}

/// A vector index that survives restarts
pub trait DurableVectorIndex: VectorIndex {
    /// Flush the index to durable storage; crash-consistent
    fn persist(&self) -> Result<()>;
}

// ============================================================================
// FLAT IN-MEMORY INDEX
// ============================================================================

/// Exact cosine-scan index held entirely in memory
#[derive(Debug, Clone)]
pub struct FlatVectorIndex {
    config: VectorIndexConfig,
    vectors: HashMap<String, Vec<f32>>,
}

impl FlatVectorIndex {
    /// Create an empty index with the given config
    pub fn new(config: VectorIndexConfig) -> Self {
        Self {
            config,
            vectors: HashMap::new(),
        }
    }

    /// Create an empty index with the given dimensionality
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self::new(VectorIndexConfig { dimensions })
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }
}

impl Default for FlatVectorIndex {
    fn default() -> Self {
        Self::new(VectorIndexConfig::default())
    }
}

impl VectorIndex for FlatVectorIndex {
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        self.vectors.insert(key.to_string(), vector.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.vectors
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| VectorIndexError::KeyNotFound(key.to_string()))
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimensions(vector)?;

        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(key, candidate)| (key.clone(), cosine_similarity(vector, candidate)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn rebuild(&mut self) -> Result<()> {
        // Exact scan keeps no derived structures; nothing to rebuild
        Ok(())
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.vectors.contains_key(key)
    }

    fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.vectors.len(),
            dimensions: self.config.dimensions,
            memory_bytes: self.vectors.len() * self.config.dimensions * std::mem::size_of::<f32>(),
        }
    }
}

// ============================================================================
// DISK-BACKED INDEX
// ============================================================================

/// Snapshot layout written to the shard file
#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
}

/// Flat index with a durable JSON shard on disk.
///
/// `persist()` writes `<shard>.tmp` and renames over the shard, so readers
/// never observe a torn snapshot.
#[derive(Debug)]
pub struct DiskVectorIndex {
    inner: FlatVectorIndex,
    shard_path: PathBuf,
}

impl DiskVectorIndex {
    /// Open the shard at `path`, loading any existing snapshot
    pub fn open(path: impl AsRef<Path>, config: VectorIndexConfig) -> Result<Self> {
        let shard_path = path.as_ref().to_path_buf();
        if let Some(parent) = shard_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut inner = FlatVectorIndex::new(config);
        if shard_path.exists() {
            let raw = fs::read_to_string(&shard_path)?;
            let snapshot: IndexSnapshot = serde_json::from_str(&raw)?;
            if snapshot.dimensions != inner.config.dimensions {
                return Err(VectorIndexError::InvalidDimensions {
                    expected: inner.config.dimensions,
                    got: snapshot.dimensions,
                });
            }
            inner.vectors = snapshot.vectors;
        }

        Ok(Self { inner, shard_path })
    }

    /// Path of the shard file backing this index
    pub fn shard_path(&self) -> &Path {
        &self.shard_path
    }
}

impl VectorIndex for DiskVectorIndex {
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        self.inner.insert(key, vector)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.inner.query(vector, k)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.inner.rebuild()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    fn stats(&self) -> VectorIndexStats {
        self.inner.stats()
    }
}

impl DurableVectorIndex for DiskVectorIndex {
    fn persist(&self) -> Result<()> {
        let snapshot = IndexSnapshot {
            dimensions: self.inner.config.dimensions,
            vectors: self.inner.vectors.clone(),
        };
        let serialized = serde_json::to_string(&snapshot)?;

        let tmp_path = self.shard_path.with_extension("tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.shard_path).map_err(|e| {
            VectorIndexError::Persistence(format!(
                "failed to swap shard {}: {}",
                self.shard_path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32, z: f32) -> Vec<f32> {
        let norm = (x * x + y * y + z * z).sqrt();
        vec![x / norm, y / norm, z / norm]
    }

    #[test]
    fn test_flat_index_insert_query() {
        let mut index = FlatVectorIndex::with_dimensions(3);
        index.insert("a", &unit(1.0, 0.0, 0.0)).unwrap();
        index.insert("b", &unit(0.0, 1.0, 0.0)).unwrap();
        index.insert("c", &unit(0.9, 0.1, 0.0)).unwrap();

        let results = index.query(&unit(1.0, 0.0, 0.0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "c");
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn test_flat_index_dimension_check() {
        let mut index = FlatVectorIndex::with_dimensions(3);
        let err = index.insert("a", &[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            VectorIndexError::InvalidDimensions {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_flat_index_remove() {
        let mut index = FlatVectorIndex::with_dimensions(3);
        index.insert("a", &unit(1.0, 0.0, 0.0)).unwrap();
        index.remove("a").unwrap();
        assert!(index.is_empty());
        assert!(matches!(
            index.remove("a"),
            Err(VectorIndexError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_flat_index_replaces_on_reinsert() {
        let mut index = FlatVectorIndex::with_dimensions(3);
        index.insert("a", &unit(1.0, 0.0, 0.0)).unwrap();
        index.insert("a", &unit(0.0, 1.0, 0.0)).unwrap();
        assert_eq!(index.len(), 1);

        let results = index.query(&unit(0.0, 1.0, 0.0), 1).unwrap();
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn test_disk_index_persist_reload() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("l2").join("index.json");
        let config = VectorIndexConfig { dimensions: 3 };

        {
            let mut index = DiskVectorIndex::open(&shard, config.clone()).unwrap();
            index.insert("a", &unit(1.0, 0.0, 0.0)).unwrap();
            index.insert("b", &unit(0.0, 0.0, 1.0)).unwrap();
            index.persist().unwrap();
        }

        let reloaded = DiskVectorIndex::open(&shard, config).unwrap();
        assert_eq!(reloaded.len(), 2);
        let results = reloaded.query(&unit(1.0, 0.0, 0.0), 1).unwrap();
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn test_disk_index_rejects_dimension_drift() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("index.json");

        {
            let mut index =
                DiskVectorIndex::open(&shard, VectorIndexConfig { dimensions: 3 }).unwrap();
            index.insert("a", &unit(1.0, 0.0, 0.0)).unwrap();
            index.persist().unwrap();
        }

        let err = DiskVectorIndex::open(&shard, VectorIndexConfig { dimensions: 4 }).unwrap_err();
        assert!(matches!(err, VectorIndexError::InvalidDimensions { .. }));
    }
}
