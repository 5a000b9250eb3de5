//! Cross-tier synchronisation and conflict resolution
//!
//! A conflict is the same key resident in two or more tiers with distinct
//! `stored_at` timestamps. Resolution is pluggable; `LastWriteWins` is the
//! default. An unresolvable conflict is an invariant violation - the sync
//! pass aborts and surfaces it rather than guessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{EntryMetadata, TierKind};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Sync error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Conflict resolution could not pick a winner
    #[error("Unresolvable conflict for key '{key}': {detail}")]
    Unresolvable {
        /// The conflicted key
        key: String,
        /// Why no winner could be picked
        detail: String,
    },
}

/// Sync result type
pub type Result<T> = std::result::Result<T, SyncError>;

// ============================================================================
// STRATEGIES
// ============================================================================

/// Conflict resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Latest `stored_at` wins outright
    #[default]
    LastWriteWins,
    /// Union of object fields; the newer write wins per field
    Merge,
    /// Highest per-key version wins; equal versions with distinct
    /// timestamps cannot be resolved
    VersionVector,
}

/// One tier's view of a conflicted key
#[derive(Debug, Clone)]
pub struct ConflictSide {
    /// Tier holding this copy
    pub tier: TierKind,
    /// The copy's metadata
    pub metadata: EntryMetadata,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Entries pushed from L1 down to L2
    pub l1_to_l2: usize,
    /// Entries pushed from L2 down to L3
    pub l2_to_l3: usize,
    /// Conflicts detected
    pub conflicts_detected: usize,
    /// Conflicts resolved
    pub conflicts_resolved: usize,
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Whether the sides constitute a conflict (distinct timestamps)
pub fn is_conflict(sides: &[ConflictSide]) -> bool {
    if sides.len() < 2 {
        return false;
    }
    let first = sides[0].metadata.stored_at;
    sides.iter().any(|s| s.metadata.stored_at != first)
}

/// Resolve a conflict, producing the metadata every tier should converge on
pub fn resolve(key: &str, strategy: ConflictStrategy, sides: &[ConflictSide]) -> Result<EntryMetadata> {
    debug_assert!(!sides.is_empty());

    match strategy {
        ConflictStrategy::LastWriteWins => Ok(newest(sides).metadata.clone()),
        ConflictStrategy::Merge => Ok(merge_sides(sides)),
        ConflictStrategy::VersionVector => {
            let max_version = sides.iter().map(|s| s.metadata.version).max().unwrap_or(0);
            let at_max: Vec<&ConflictSide> = sides
                .iter()
                .filter(|s| s.metadata.version == max_version)
                .collect();

            let contested = at_max
                .iter()
                .any(|s| s.metadata.stored_at != at_max[0].metadata.stored_at);
            if contested {
                return Err(SyncError::Unresolvable {
                    key: key.to_string(),
                    detail: format!("version {max_version} held by sides with distinct timestamps"),
                });
            }
            Ok(at_max[0].metadata.clone())
        }
    }
}

fn newest(sides: &[ConflictSide]) -> &ConflictSide {
    sides
        .iter()
        .max_by(|a, b| {
            a.metadata
                .stored_at
                .cmp(&b.metadata.stored_at)
                // Faster tier wins exact timestamp ties
                .then_with(|| b.tier.rank().cmp(&a.tier.rank()))
        })
        .expect("sides checked non-empty")
}

/// Field-wise union: every key from every side, the newest side winning
/// collisions. Non-object values fall back to last-write-wins.
fn merge_sides(sides: &[ConflictSide]) -> EntryMetadata {
    let latest: DateTime<Utc> = sides
        .iter()
        .map(|s| s.metadata.stored_at)
        .max()
        .unwrap_or_else(Utc::now);
    let max_version = sides.iter().map(|s| s.metadata.version).max().unwrap_or(0);

    let all_objects = sides
        .iter()
        .all(|s| s.metadata.value.is_object());

    if !all_objects {
        let mut meta = newest(sides).metadata.clone();
        meta.stored_at = latest;
        meta.version = max_version;
        return meta;
    }

    // Oldest first so newer sides overwrite on collision
    let mut ordered: Vec<&ConflictSide> = sides.iter().collect();
    ordered.sort_by_key(|s| s.metadata.stored_at);

    let mut merged = serde_json::Map::new();
    for side in ordered {
        if let Some(fields) = side.metadata.value.as_object() {
            for (field, value) in fields {
                merged.insert(field.clone(), value.clone());
            }
        }
    }

    EntryMetadata {
        value: serde_json::Value::Object(merged),
        stored_at: latest,
        version: max_version,
    }
}

// ============================================================================
// TESTS
// ============================================================================
