//! Cache entries and store/retrieve surface types
//!
//! A cache entry binds a key to a dense vector plus a JSON value with its
//! write timestamp. `stored_at` is monotonic per key: a write carrying an
//! older timestamp than the resident entry loses, regardless of which tier
//! it arrives through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TIERS
// ============================================================================

/// The three cache tiers, ordered by latency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// In-memory vector cache
    L1,
    /// On-disk index
    L2,
    /// Durable object store
    L3,
}

impl TierKind {
    /// Tier rank for tie-breaking: lower rank answers faster
    pub fn rank(&self) -> u8 {
        match self {
            TierKind::L1 => 0,
            TierKind::L2 => 1,
            TierKind::L3 => 2,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::L1 => "l1",
            TierKind::L2 => "l2",
            TierKind::L3 => "l3",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tier selector for fabric searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierSelector {
    /// Probe only L1
    L1,
    /// Probe only L2
    L2,
    /// Probe only L3
    L3,
    /// Probe every tier and merge
    #[default]
    All,
}

impl TierSelector {
    /// Whether the selector includes the given tier
    pub fn includes(&self, tier: TierKind) -> bool {
        matches!(
            (self, tier),
            (TierSelector::All, _)
                | (TierSelector::L1, TierKind::L1)
                | (TierSelector::L2, TierKind::L2)
                | (TierSelector::L3, TierKind::L3)
        )
    }
}

// ============================================================================
// ACCESS PATTERNS AND STORE OPTIONS
// ============================================================================

/// Declared access pattern used for initial tier placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPattern {
    /// Hot data, read on most requests
    Frequent,
    /// Warm data, read regularly
    Moderate,
    /// Rarely read, archival
    #[default]
    Cold,
}

/// Options accepted by `FederatedMemory::store`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOptions {
    /// Declared access pattern
    #[serde(default)]
    pub access_pattern: AccessPattern,
    /// Pre-computed vector; when absent the fabric embeds the serialized value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Explicit write timestamp; defaults to now
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<DateTime<Utc>>,
}

// ============================================================================
// ENTRIES
// ============================================================================

/// Value payload plus write bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// The stored value
    pub value: serde_json::Value,
    /// Write timestamp; monotonic per key
    pub stored_at: DateTime<Utc>,
    /// Per-key write counter, used by version-vector conflict resolution
    pub version: u64,
}

/// An L1/L2 cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Dense vector used for similarity search
    pub vector: Vec<f32>,
    /// Value and write bookkeeping
    pub metadata: EntryMetadata,
    /// Number of reads since the entry landed in the tier
    pub access_count: u64,
    /// Last read timestamp, drives L2's LRU eviction
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a fresh entry with zeroed access bookkeeping
    pub fn new(key: impl Into<String>, vector: Vec<f32>, metadata: EntryMetadata) -> Self {
        let stored_at = metadata.stored_at;
        Self {
            key: key.into(),
            vector,
            metadata,
            access_count: 0,
            last_access: stored_at,
        }
    }

    /// Record a read
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_access = now;
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Receipt returned by `store`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    /// Tier the value landed in
    pub tier: TierKind,
    /// Whether the synchronous write succeeded
    pub ok: bool,
}

/// One hit from a fabric search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSearchResult {
    /// Cache key
    pub key: String,
    /// Stored value
    pub value: serde_json::Value,
    /// Cosine similarity to the query
    pub similarity: f32,
    /// Tier that answered
    pub tier: TierKind,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_rank_ordering() {
        assert!(TierKind::L1.rank() < TierKind::L2.rank());
        assert!(TierKind::L2.rank() < TierKind::L3.rank());
    }

    #[test]
    fn test_tier_selector_includes() {
        assert!(TierSelector::All.includes(TierKind::L3));
        assert!(TierSelector::L1.includes(TierKind::L1));
        assert!(!TierSelector::L1.includes(TierKind::L2));
    }

    #[test]
    fn test_entry_touch_bumps_bookkeeping() {
        let metadata = EntryMetadata {
            value: serde_json::json!({"x": 1}),
            stored_at: Utc::now(),
            version: 1,
        };
        let mut entry = CacheEntry::new("k", vec![1.0, 0.0], metadata);
        assert_eq!(entry.access_count, 0);

        let later = Utc::now();
        entry.touch(later);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_access, later);
    }
}
