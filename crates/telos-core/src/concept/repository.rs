//! Concept repository - the persistence boundary
//!
//! Sole writer of concept records into L3. Concepts are created by
//! `persist`, mutated only through explicit repository calls, and deleted
//! only by `delete`; cache eviction never removes a concept. Every edge
//! endpoint must resolve to an existing oid at persist time.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::memory::{L3ObjectStore, ObjectStoreError};

use super::entity::{Concept, ConceptRecord};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Key prefix separating concept records from cache entries in L3
pub const CONCEPT_KEY_PREFIX: &str = "concept/";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Repository error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConceptError {
    /// Concept oid not found; an error for load/delete, unlike cache misses
    #[error("Concept not found: {0}")]
    NotFound(String),
    /// An edge references an oid that does not exist
    #[error("Concept '{oid}' references missing oid '{target}'")]
    DanglingEdge {
        /// The concept being persisted
        oid: String,
        /// The missing endpoint
        target: String,
    },
    /// A persisted record failed to hydrate
    #[error("Malformed concept record for '{oid}': {detail}")]
    Malformed {
        /// Record key
        oid: String,
        /// What failed to parse
        detail: String,
    },
    /// L3 failure
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    /// Record (de)serialization error
    #[error("Concept codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Repository result type
pub type Result<T> = std::result::Result<T, ConceptError>;

// ============================================================================
// REPOSITORY
// ============================================================================

/// Repository over the shared L3 object store
pub struct ConceptRepository {
    store: Arc<L3ObjectStore>,
}

fn storage_key(oid: &str) -> String {
    format!("{CONCEPT_KEY_PREFIX}{oid}")
}

impl ConceptRepository {
    /// Create a repository over the given store
    pub fn new(store: Arc<L3ObjectStore>) -> Self {
        Self { store }
    }

    /// Persist a concept, assigning an oid when absent. Clamps bounded
    /// fields, validates edge endpoints and stamps `last_modified`.
    pub fn persist(&self, concept: &mut Concept) -> Result<String> {
        if concept.oid.is_empty() {
            concept.oid = Uuid::new_v4().to_string();
        }
        concept.clamp_ranges();

        for target in concept.referenced_oids() {
            if *target == concept.oid {
                continue;
            }
            if !self.exists(target)? {
                return Err(ConceptError::DanglingEdge {
                    oid: concept.oid.clone(),
                    target: target.clone(),
                });
            }
        }

        concept.last_modified = Utc::now();
        let record = ConceptRecord::from_concept(concept);
        self.store.store(
            &storage_key(&concept.oid),
            &serde_json::to_value(&record)?,
            concept.last_modified,
        )?;

        tracing::debug!(oid = %concept.oid, label = %concept.label, "concept persisted");
        Ok(concept.oid.clone())
    }

    /// Load a concept by oid, bumping its usage counter.
    /// A miss is an error here, unlike cache retrieval.
    pub fn load(&self, oid: &str) -> Result<Concept> {
        let stored = self
            .store
            .retrieve(&storage_key(oid))?
            .ok_or_else(|| ConceptError::NotFound(oid.to_string()))?;

        let mut concept = self.hydrate(stored.object)?;

        // Usage bookkeeping writes back through the same boundary
        concept.usage_count += 1;
        let record = ConceptRecord::from_concept(&concept);
        self.store.store(
            &storage_key(oid),
            &serde_json::to_value(&record)?,
            Utc::now(),
        )?;

        Ok(concept)
    }

    /// Translate a canonical persisted value into the in-memory entity
    pub fn hydrate(&self, value: serde_json::Value) -> Result<Concept> {
        let oid = value
            .get("oid")
            .and_then(|o| o.as_str())
            .unwrap_or("<unknown>")
            .to_string();
        let record: ConceptRecord =
            serde_json::from_value(value).map_err(|e| ConceptError::Malformed {
                oid,
                detail: e.to_string(),
            })?;
        Ok(record.into_concept())
    }

    /// Delete a concept by oid; a miss is an error
    pub fn delete(&self, oid: &str) -> Result<()> {
        match self.store.delete(&storage_key(oid)) {
            Ok(()) => Ok(()),
            Err(ObjectStoreError::NotFound(_)) => Err(ConceptError::NotFound(oid.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a concept exists without touching its usage counter
    pub fn exists(&self, oid: &str) -> Result<bool> {
        Ok(self.store.retrieve(&storage_key(oid))?.is_some())
    }

    /// Read without usage bookkeeping (indexer extraction path)
    pub fn peek(&self, oid: &str) -> Result<Concept> {
        let stored = self
            .store
            .retrieve(&storage_key(oid))?
            .ok_or_else(|| ConceptError::NotFound(oid.to_string()))?;
        self.hydrate(stored.object)
    }

    /// List concepts, paginated by oid order
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<Concept>> {
        let keys = self
            .store
            .list_keys_with_prefix(CONCEPT_KEY_PREFIX, limit, offset)?;

        let mut concepts = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(stored) = self.store.retrieve(&key)? else {
                continue;
            };
            concepts.push(self.hydrate(stored.object)?);
        }
        Ok(concepts)
    }

    /// All concept oids (indexer extraction path)
    pub fn list_oids(&self) -> Result<Vec<String>> {
        let mut oids = Vec::new();
        let mut offset = 0;
        const PAGE: usize = 256;
        loop {
            let keys = self
                .store
                .list_keys_with_prefix(CONCEPT_KEY_PREFIX, PAGE, offset)?;
            if keys.is_empty() {
                break;
            }
            offset += keys.len();
            oids.extend(
                keys.into_iter()
                    .filter_map(|k| k.strip_prefix(CONCEPT_KEY_PREFIX).map(str::to_string)),
            );
        }
        Ok(oids)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::entity::{CausalEdge, CausalKind};

    fn open_repo() -> (tempfile::TempDir, ConceptRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(L3ObjectStore::open(dir.path().join("l3")).unwrap());
        (dir, ConceptRepository::new(store))
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let (_dir, repo) = open_repo();
        let mut concept = Concept::new("combustion");
        concept.confidence = 0.75;

        let oid = repo.persist(&mut concept).unwrap();
        assert!(!oid.is_empty());

        let loaded = repo.load(&oid).unwrap();
        assert!(concept.same_content(&loaded));
        assert_eq!(loaded.usage_count, 1);
    }

    #[test]
    fn test_load_bumps_usage_each_time() {
        let (_dir, repo) = open_repo();
        let mut concept = Concept::new("oxidation");
        let oid = repo.persist(&mut concept).unwrap();

        repo.load(&oid).unwrap();
        let second = repo.load(&oid).unwrap();
        assert_eq!(second.usage_count, 2);
    }

    #[test]
    fn test_load_missing_is_error() {
        let (_dir, repo) = open_repo();
        assert!(matches!(
            repo.load("no-such-oid"),
            Err(ConceptError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing_is_error() {
        let (_dir, repo) = open_repo();
        assert!(matches!(
            repo.delete("no-such-oid"),
            Err(ConceptError::NotFound(_))
        ));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let (_dir, repo) = open_repo();
        let mut concept = Concept::new("spark");
        concept
            .causal_edges
            .push(CausalEdge::new(CausalKind::Causes, "missing-oid", 0.9, 0.9));

        assert!(matches!(
            repo.persist(&mut concept),
            Err(ConceptError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn test_edge_to_existing_concept_accepted() {
        let (_dir, repo) = open_repo();
        let mut fire = Concept::new("fire");
        let fire_oid = repo.persist(&mut fire).unwrap();

        let mut spark = Concept::new("spark");
        spark
            .causal_edges
            .push(CausalEdge::new(CausalKind::Causes, fire_oid.clone(), 0.9, 0.8));
        let spark_oid = repo.persist(&mut spark).unwrap();

        let loaded = repo.load(&spark_oid).unwrap();
        assert_eq!(loaded.causal_edges[0].target, fire_oid);
    }

    #[test]
    fn test_list_pagination() {
        let (_dir, repo) = open_repo();
        for label in ["a", "b", "c", "d", "e"] {
            repo.persist(&mut Concept::new(label)).unwrap();
        }

        let first = repo.list(2, 0).unwrap();
        let second = repo.list(2, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_ne!(first[0].oid, second[0].oid);
        assert_eq!(repo.list_oids().unwrap().len(), 5);
    }

    #[test]
    fn test_self_reference_allowed() {
        let (_dir, repo) = open_repo();
        let mut concept = Concept::new("recursion");
        concept.oid = Uuid::new_v4().to_string();
        concept
            .relationships
            .associated_with
            .push(concept.oid.clone());

        assert!(repo.persist(&mut concept).is_ok());
    }
}
