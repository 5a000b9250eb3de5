//! # Telos Core
//!
//! Neuro-symbolic cognitive substrate. The hard systems core of Telos:
//!
//! - **Federated Tiered Memory**: L1/L2/L3 cache hierarchy (in-memory
//!   vector cache, on-disk index, durable object store) with a
//!   transactional outbox, promotion/demotion, pluggable conflict
//!   resolution and performance-driven adaptive sizing
//! - **HRC Decision Cycle**: Elaborate -> Propose -> Select -> Apply ->
//!   Learn with utility-weighted selection, impasse-driven subgoaling and
//!   chunking
//! - **Active-Inference Planner**: candidate policies scored by Expected
//!   Free Energy over a generative world model that learns transition,
//!   causal and observation parameters from outcomes
//! - **Chaos Conductor**: hypothesis-driven fault injection with
//!   steady-state monitoring and a validation gauntlet
//! - **Graph Indexer**: hierarchical community detection over the concept
//!   graph with transducer-generated, embedded summaries cached in L2
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use telos_core::{CoreConfig, CoreContext, StoreOptions};
//!
//! let core = CoreContext::open(CoreConfig::new("/var/lib/telos"))?;
//! core.serve();
//!
//! // Store through the fabric
//! let receipt = core.fabric()
//!     .store("doc42", serde_json::json!({"body": "..."}), StoreOptions::default())
//!     .await?;
//!
//! // Run a decision cycle
//! let outcome = core.hrc().run_decision_cycle(Default::default());
//!
//! // Plan under uncertainty
//! let plan = core.planner().plan_current(
//!     &telos_core::Goal::new("resolve", 0.8),
//!     &Default::default(),
//! )?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
// Only warn about missing docs for public items exported from the crate root
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod chaos;
pub mod concept;
pub mod embeddings;
pub mod hrc;
pub mod indexer;
pub mod memory;
pub mod planner;
pub mod runtime;
pub mod search;
pub mod transducer;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Memory fabric
pub use memory::{
    AccessPattern, CacheEntry, ConflictStrategy, EntryMetadata, FabricConfig, FabricError,
    FabricStats, FederatedMemory, L3ObjectStore, ObjectStoreError, OutboxDepths, OutboxEvent,
    OutboxOperation, StoreOptions, StoreReceipt, SyncReport, TierKind, TierSearchResult,
    TierSelector,
};

// Concept repository
pub use concept::{
    CausalEdge, CausalKind, Concept, ConceptError, ConceptRecord, ConceptRepository, Relationships,
};

// HRC decision cycle
pub use hrc::{
    Condition, CycleOutcome, HrcConfig, HrcController, Impasse, ImpasseKind, Operator,
    OperatorRegistry, ProductionRule, WorkingMemory,
};

// Active-inference planner
pub use planner::{
    ActiveInferencePlanner, Goal, ObservedOutcome, PlanOutcome, PlannerError, PlanningConstraints,
    Policy, PredictedOutcome, WorldModel, WorldModelState,
};

// Chaos conductor
pub use chaos::{
    ChaosConductor, ChaosConfig, ChaosError, ChaosExperiment, ExperimentOutcome,
    ExperimentOverrides, ExperimentRecord, GauntletReport, MetricRegistry,
};

// Graph indexer
pub use indexer::{Community, CommunitySummary, GraphIndexer, IndexerConfig, IndexerError};

// Transducer contract
pub use transducer::{
    LlmTransducer, StubTransducer, TransduceRequest, TransduceResponse, TransducerError,
};

// Embeddings
pub use embeddings::{
    cosine_similarity, EmbeddingProvider, HashEmbedder, EMBEDDING_DIMENSIONS,
};

// Runtime
pub use runtime::{CoreConfig, CoreContext, CoreError, Scheduler};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AccessPattern, CoreConfig, CoreContext, CycleOutcome, FabricConfig, FederatedMemory, Goal,
        HrcController, PlanningConstraints, StoreOptions, TierKind, TierSelector, WorkingMemory,
    };

    pub use crate::{
        ActiveInferencePlanner, ChaosConductor, Concept, ConceptRepository, GraphIndexer,
        StubTransducer,
    };
}
