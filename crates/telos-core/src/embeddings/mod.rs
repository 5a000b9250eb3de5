//! Semantic Embeddings Module
//!
//! Embedding generation behind a provider seam:
//! - Deterministic feature-hashing embedder (the default, no model download)
//! - Cosine / dot / euclidean similarity helpers shared by every tier
//!
//! The hash embedder is a stand-in with stable output: the same text always
//! maps to the same unit vector, which is what the indexer and the e2e
//! scenarios rely on. A real ONNX-backed provider plugs in through
//! [`EmbeddingProvider`] without touching any call site.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Dimensions produced by the default hash embedder
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Maximum text length for embedding (truncated if longer)
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Token n-gram width used by the hash embedder
const NGRAM_WIDTH: usize = 3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Input was empty after normalization
    #[error("Cannot embed empty text")]
    EmptyInput,
    /// Provider-specific failure
    #[error("Embedding provider failed: {0}")]
    Provider(String),
}

/// Embedding result type
pub type Result<T> = std::result::Result<T, EmbeddingError>;

// ============================================================================
// PROVIDER SEAM
// ============================================================================

/// Source of dense vectors for cache entries and community summaries.
///
/// Implementations must be deterministic per input within a process lifetime;
/// the vector index keys promotions and searches off these vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text into a dense vector
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Dimensionality of produced vectors
    fn dimensions(&self) -> usize;
}

// ============================================================================
// HASH EMBEDDER (deterministic stub)
// ============================================================================

/// Feature-hashing embedder producing stable 384-dim unit vectors.
///
/// Tokenizes on non-alphanumeric boundaries, hashes word n-grams into
/// buckets with a sign trick so collisions cancel rather than pile up,
/// then L2-normalizes. No model files, no I/O.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

impl HashEmbedder {
    /// Create a hash embedder with the given output dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let truncated: String = text.chars().take(MAX_TEXT_LENGTH).collect();
        let lowered = truncated.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimensions];

        // Unigrams carry most of the signal
        for token in &tokens {
            let (idx, sign) = self.bucket(token);
            vector[idx] += sign;
        }

        // Word n-grams capture local ordering
        for window in tokens.windows(NGRAM_WIDTH) {
            let joined = window.join(" ");
            let (idx, sign) = self.bucket(&joined);
            vector[idx] += sign * 0.5;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Cosine similarity between two vectors (-1.0 to 1.0)
///
/// Returns 0.0 for mismatched dimensions or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Dot product of two vectors
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean distance between two vectors
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

// ============================================================================
// TESTS
// ============================================================================
