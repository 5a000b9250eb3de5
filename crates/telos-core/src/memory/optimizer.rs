//! Performance telemetry and adaptive tier sizing
//!
//! Hit ratio is hits / (hits + misses) per tier, measured over the window
//! since the last optimisation pass. When a tier underperforms the target
//! its capacity grows by 1.2x; when it comfortably exceeds the target it
//! shrinks by 0.8x, floored so a quiet tier never collapses to nothing.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::entry::TierKind;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Rolling window of query latencies kept for the p99 gauge
const LATENCY_WINDOW: usize = 512;

/// Smallest capacity adaptive sizing will shrink a tier to
pub const MIN_TIER_SIZE: usize = 16;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Hit/miss counters for one tier
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierTelemetry {
    /// Requests answered by this tier
    pub hits: u64,
    /// Requests this tier could not answer
    pub misses: u64,
}

impl TierTelemetry {
    /// hits / (hits + misses); `None` before any traffic
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }

    fn reset(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }
}

/// Fabric-wide counters plus the query latency window
#[derive(Debug, Default)]
pub struct FabricTelemetry {
    l1: TierTelemetry,
    l2: TierTelemetry,
    l3: TierTelemetry,
    query_latencies_ms: VecDeque<f64>,
}

impl FabricTelemetry {
    /// Record a hit on `tier`
    pub fn record_hit(&mut self, tier: TierKind) {
        self.tier_mut(tier).hits += 1;
    }

    /// Record a miss on `tier`
    pub fn record_miss(&mut self, tier: TierKind) {
        self.tier_mut(tier).misses += 1;
    }

    /// Record one end-to-end query latency
    pub fn record_query_latency(&mut self, ms: f64) {
        if self.query_latencies_ms.len() >= LATENCY_WINDOW {
            self.query_latencies_ms.pop_front();
        }
        self.query_latencies_ms.push_back(ms);
    }

    /// Counters for `tier`
    pub fn tier(&self, tier: TierKind) -> TierTelemetry {
        match tier {
            TierKind::L1 => self.l1,
            TierKind::L2 => self.l2,
            TierKind::L3 => self.l3,
        }
    }

    fn tier_mut(&mut self, tier: TierKind) -> &mut TierTelemetry {
        match tier {
            TierKind::L1 => &mut self.l1,
            TierKind::L2 => &mut self.l2,
            TierKind::L3 => &mut self.l3,
        }
    }

    /// p99 of the recorded latency window; `None` before any traffic
    pub fn p99_latency_ms(&self) -> Option<f64> {
        if self.query_latencies_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.query_latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64) * 0.99).ceil() as usize;
        Some(sorted[idx.saturating_sub(1).min(sorted.len() - 1)])
    }

    /// Reset the hit/miss window after an optimisation pass
    pub fn reset_window(&mut self) {
        self.l1.reset();
        self.l2.reset();
        self.l3.reset();
    }
}

// ============================================================================
// ADAPTIVE SIZING
// ============================================================================

/// Adaptive sizing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Hit ratio the fabric aims for
    pub target_hit_ratio: f64,
    /// Growth factor applied below target
    pub grow_factor: f64,
    /// Shrink factor applied above target + 0.1
    pub shrink_factor: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            target_hit_ratio: 0.85,
            grow_factor: 1.2,
            shrink_factor: 0.8,
        }
    }
}

/// Capacity adjustment decided from one measurement window.
/// Returns the new capacity, or `None` when no change is warranted.
pub fn plan_resize(
    current_max: usize,
    hit_ratio: Option<f64>,
    config: &OptimizerConfig,
) -> Option<usize> {
    let ratio = hit_ratio?;

    if ratio < config.target_hit_ratio {
        let grown = ((current_max as f64) * config.grow_factor).ceil() as usize;
        (grown != current_max).then_some(grown)
    } else if ratio > config.target_hit_ratio + 0.1 {
        let shrunk = (((current_max as f64) * config.shrink_factor).floor() as usize)
            .max(MIN_TIER_SIZE);
        (shrunk != current_max).then_some(shrunk)
    } else {
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================
