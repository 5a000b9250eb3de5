//! Vector Index Adapters
//!
//! Pluggable nearest-neighbour backends consumed by the cache tiers:
//! - [`FlatVectorIndex`] - exact cosine scan held in memory (L1)
//! - [`DiskVectorIndex`] - the same index with a crash-consistent on-disk
//!   snapshot (L2)
//!
//! The fabric treats backends as opaque behind [`VectorIndex`] /
//! [`DurableVectorIndex`]; an HNSW implementation drops in behind the same
//! traits when exact scan stops being fast enough.

mod vector;

pub use vector::{
    DiskVectorIndex, DurableVectorIndex, FlatVectorIndex, VectorIndex, VectorIndexConfig,
    VectorIndexError, VectorIndexStats, DEFAULT_DIMENSIONS,
};

/// Vector index result type
pub type Result<T> = std::result::Result<T, VectorIndexError>;
