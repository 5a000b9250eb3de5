//! Graph Indexer
//!
//! Periodic pipeline over the L3 concept graph: extract -> hierarchical
//! community detection -> summary generation (transducer, batched) ->
//! embed -> cache in L2. `global_semantic_search` ranks cached summaries
//! by level (coarser first) then cosine similarity, with an LRU cache over
//! query embeddings.

mod community;
mod summary;

pub use community::{
    detect_communities, Community, ConceptGraph, DetectionConfig,
};
pub use summary::{
    render_community_text, summary_schema, CommunitySummary, SUMMARY_TYPE,
};

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::concept::{ConceptError, ConceptRepository};
use crate::embeddings::{cosine_similarity, EmbeddingError, EmbeddingProvider};
use crate::memory::{AccessPattern, FabricError, FederatedMemory, StoreOptions, TierSelector};
use crate::transducer::{LlmTransducer, TransducerError};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Query embeddings cached for repeated global searches
const QUERY_CACHE_CAPACITY: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Indexer error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Repository failure during extraction
    #[error(transparent)]
    Concept(#[from] ConceptError),
    /// Fabric failure while caching summaries
    #[error(transparent)]
    Fabric(#[from] FabricError),
    /// Transducer failure during summary generation
    #[error(transparent)]
    Transducer(#[from] TransducerError),
    /// Embedding failure
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Lock poisoned by a panicking holder
    #[error("Indexer lock poisoned")]
    LockPoisoned,
}

/// Indexer result type
pub type Result<T> = std::result::Result<T, IndexerError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Indexer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerConfig {
    /// Interval between background indexing cycles
    #[serde(skip)]
    pub interval: Duration,
    /// Community detection parameters
    pub detection: DetectionConfig,
    /// Transducer calls per batch
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            detection: DetectionConfig::default(),
            batch_size: 10,
        }
    }
}

/// Outcome of one indexing cycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Concepts extracted from L3
    pub concepts: usize,
    /// Hierarchy levels emitted
    pub levels: usize,
    /// Communities detected across all levels
    pub communities: usize,
    /// Summaries generated and cached
    pub summaries: usize,
}

// ============================================================================
// INDEXER
// ============================================================================

/// The graph indexer
pub struct GraphIndexer {
    repository: Arc<ConceptRepository>,
    fabric: Arc<FederatedMemory>,
    transducer: Arc<dyn LlmTransducer>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: IndexerConfig,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl GraphIndexer {
    /// Wire the indexer over its collaborators
    pub fn new(
        repository: Arc<ConceptRepository>,
        fabric: Arc<FederatedMemory>,
        transducer: Arc<dyn LlmTransducer>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            repository,
            fabric,
            transducer,
            embedder,
            config,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Configured background interval
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// One full indexing cycle
    pub async fn run_indexing_cycle(&self) -> Result<IndexReport> {
        // Extract the concept graph through the repository boundary
        let oids = self.repository.list_oids()?;
        let mut concepts = Vec::with_capacity(oids.len());
        for oid in &oids {
            match self.repository.peek(oid) {
                Ok(concept) => concepts.push(concept),
                Err(ConceptError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let graph = ConceptGraph::from_concepts(&concepts);
        let levels = detect_communities(&graph, &self.config.detection);

        let by_oid: BTreeMap<&str, &crate::concept::Concept> =
            concepts.iter().map(|c| (c.oid.as_str(), c)).collect();

        let mut report = IndexReport {
            concepts: concepts.len(),
            levels: levels.len(),
            ..Default::default()
        };

        for level in &levels {
            report.communities += level.len();

            // Transducer calls are rate-limited: summaries go in batches
            for batch in level.chunks(self.config.batch_size) {
                for community in batch {
                    match self.summarise_community(community, &by_oid).await {
                        Ok(()) => report.summaries += 1,
                        Err(e) => {
                            // One bad community must not sink the cycle
                            warn!(community = %community.id, error = %e, "summary failed");
                        }
                    }
                }
                tokio::task::yield_now().await;
            }
        }

        info!(
            concepts = report.concepts,
            levels = report.levels,
            communities = report.communities,
            summaries = report.summaries,
            "indexing cycle complete"
        );
        Ok(report)
    }

    async fn summarise_community(
        &self,
        community: &Community,
        by_oid: &BTreeMap<&str, &crate::concept::Concept>,
    ) -> Result<()> {
        let members: Vec<&crate::concept::Concept> = community
            .nodes
            .iter()
            .filter_map(|oid| by_oid.get(oid.as_str()).copied())
            .collect();
        if members.is_empty() {
            return Ok(());
        }

        let text = render_community_text(&members);
        let schema = summary_schema();
        let generated = self.transducer.text_to_schema(&text, &schema).await?;

        let summary = CommunitySummary {
            community_id: community.id.clone(),
            level: community.level,
            title: generated
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or(&community.id)
                .to_string(),
            summary_text: generated
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            key_concepts: generated
                .get("key_concepts")
                .map(json_string_array)
                .unwrap_or_default(),
            relationships: generated
                .get("relationships")
                .map(json_string_array)
                .unwrap_or_default(),
            embedding: Vec::new(),
            generated_at: Utc::now(),
        };

        let embedding = self.embedder.embed(&format!(
            "{} {}",
            summary.title, summary.summary_text
        ))?;

        // Moderate access pattern routes the summary into L2
        self.fabric
            .store(
                &community.id,
                summary.to_cache_value(),
                StoreOptions {
                    access_pattern: AccessPattern::Moderate,
                    vector: Some(embedding),
                    stored_at: None,
                },
            )
            .await?;

        debug!(community = %community.id, level = community.level, "summary cached");
        Ok(())
    }

    /// Search cached community summaries: coarser levels rank first, cosine
    /// similarity breaks ranks within a level
    pub async fn global_semantic_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(CommunitySummary, f32)>> {
        let query_vector = {
            let cached = {
                let mut cache = self
                    .query_cache
                    .lock()
                    .map_err(|_| IndexerError::LockPoisoned)?;
                cache.get(query).cloned()
            };
            match cached {
                Some(vector) => vector,
                None => {
                    let vector = self.embedder.embed(query)?;
                    let mut cache = self
                        .query_cache
                        .lock()
                        .map_err(|_| IndexerError::LockPoisoned)?;
                    cache.put(query.to_string(), vector.clone());
                    vector
                }
            }
        };

        // Over-fetch from L2 so post-filtering still fills k
        let hits = self
            .fabric
            .search(&query_vector, (k * 4).max(16), TierSelector::L2)
            .await?;

        let mut summaries: Vec<(CommunitySummary, f32)> = hits
            .iter()
            .filter_map(|hit| {
                CommunitySummary::from_cache_value(&hit.value)
                    .map(|summary| (summary, hit.similarity))
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.0.level
                .cmp(&a.0.level)
                .then_with(|| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.community_id.cmp(&b.0.community_id))
        });
        summaries.truncate(k);
        Ok(summaries)
    }

    /// Cosine similarity between a query and a stored summary embedding
    /// (exposed for diagnostics)
    pub fn similarity(&self, query_vector: &[f32], summary_vector: &[f32]) -> f32 {
        cosine_similarity(query_vector, summary_vector)
    }
}

fn json_string_array(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
