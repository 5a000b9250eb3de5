//! Concept Repository
//!
//! The concept entity (typed relationships plus causal-edge metadata) and
//! its persistence boundary over L3. The repository is the only writer of
//! concept records; everything else references concepts by oid.

mod entity;
mod repository;

pub use entity::{
    CausalEdge, CausalEdgeRecord, CausalKind, Concept, ConceptRecord, Relationships,
};
pub use repository::{ConceptError, ConceptRepository, CONCEPT_KEY_PREFIX};
