//! Tiered Memory Fabric
//!
//! L1/L2/L3 cache hierarchy with a transactional outbox:
//! - L1: in-memory vector cache, LFU eviction
//! - L2: on-disk index, LRU eviction, durable across restarts
//! - L3: SQLite object store with an append-only transaction log
//!
//! Cross-tier effects (replication, promotion, invalidation) ride the
//! outbox and are applied by a background processor. A sync coordinator
//! periodically pushes newer entries down the hierarchy and resolves
//! conflicts; a performance optimiser resizes the cache tiers from
//! observed hit ratios.

mod entry;
mod fabric;
mod l1;
mod l2;
mod l3;
mod optimizer;
mod outbox;
mod sync;

pub use entry::{
    AccessPattern, CacheEntry, EntryMetadata, StoreOptions, StoreReceipt, TierKind,
    TierSearchResult, TierSelector,
};
pub use fabric::{
    FabricConfig, FabricError, FabricStats, FederatedMemory, L1_SIZE_LIMIT_BYTES,
    L2_SIZE_LIMIT_BYTES,
};
pub use l3::{L3ObjectStore, ObjectStoreError, StoredObject};
pub use optimizer::{plan_resize, OptimizerConfig, TierTelemetry, MIN_TIER_SIZE};
pub use outbox::{
    ApplyOutcome, DrainReport, EventStatus, Outbox, OutboxDepths, OutboxError, OutboxEvent,
    OutboxOperation, MAX_RETRIES,
};
pub use sync::{ConflictStrategy, SyncError, SyncReport};
