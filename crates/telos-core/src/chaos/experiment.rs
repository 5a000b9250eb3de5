//! Chaos experiments and their history records
//!
//! An experiment binds a hypothesis to a target subsystem, a hazard, a
//! steady-state metric and a breach rule. Five canonical experiments ship
//! pre-registered; each completed run appends exactly one record to the
//! history log.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::metrics::{
    METRIC_MEMORY_USAGE, METRIC_P99_QUERY_LATENCY, METRIC_REASONING_ACCURACY,
    METRIC_REPLICATION_LAG, METRIC_SCHEMA_ADHERENCE,
};

// ============================================================================
// TARGET NAMES
// ============================================================================

/// Fabric target (latency injection, memory pressure)
pub const TARGET_FEDERATED_MEMORY: &str = "federated_memory";

/// Outbox target (poison messages)
pub const TARGET_OUTBOX: &str = "outbox";

/// Transducer target (schema violations)
pub const TARGET_TRANSDUCER: &str = "llm_transducer";

/// HRC target (impasse storms)
pub const TARGET_HRC: &str = "hrc";

// ============================================================================
// EXPERIMENTS
// ============================================================================

/// How a metric's deviation from baseline is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Breach iff `current > baseline * threshold` (latency, lag, memory)
    LatencyLike,
    /// Breach iff `current < threshold` (adherence, accuracy)
    Ratio,
}

/// A registered chaos experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosExperiment {
    /// Experiment id, e.g. `CEP-001`
    pub id: String,
    /// Target subsystem name
    pub target: String,
    /// Hazard identifier the target understands
    pub hazard: String,
    /// Hazard parameters
    pub parameters: Value,
    /// Steady-state metric name
    pub steady_state_metric: String,
    /// Breach rule for the metric
    pub metric_kind: MetricKind,
    /// Breach threshold (multiplier for latency-like, floor for ratios)
    pub success_threshold: f64,
    /// The hypothesis under test
    pub hypothesis: String,
    /// Monitoring duration
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// Serde helper: durations as whole seconds in the log
mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Per-run overrides accepted by `start_experiment`
#[derive(Debug, Clone, Default)]
pub struct ExperimentOverrides {
    /// Override the monitoring duration
    pub duration: Option<Duration>,
    /// Override the breach threshold
    pub success_threshold: Option<f64>,
    /// Override the hazard parameters
    pub parameters: Option<Value>,
}

// ============================================================================
// INSTANCE STATE AND RECORDS
// ============================================================================

/// Lifecycle status of a running experiment instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Hazard being injected
    Injecting,
    /// Steady-state monitoring loop
    Monitoring,
    /// A breach was observed
    SteadyStateBreached,
    /// Finished cleanly
    Completed,
    /// Lifecycle failure
    Failed,
}

/// Terminal classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentOutcome {
    /// Duration elapsed with no breach
    Passed,
    /// Steady state breached
    Failed,
    /// Exception during the lifecycle
    Error,
}

/// Details of a steady-state breach
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachDetails {
    /// Metric that breached
    pub metric: String,
    /// Breach kind: `threshold_exceeded`, `below_threshold`,
    /// `metric_unavailable`
    pub kind: String,
    /// Pre-injection baseline
    pub baseline: f64,
    /// Observed value at breach (absent for unavailable metrics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    /// When the breach was observed
    pub at: DateTime<Utc>,
}

/// One appended history record; exactly one per completed instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRecord {
    /// Unique run id
    pub run_id: String,
    /// The experiment that ran
    pub experiment_id: String,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
    /// Measured baseline
    pub baseline: Option<f64>,
    /// Terminal classification
    pub outcome: ExperimentOutcome,
    /// Breach detail when the steady state broke
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breach: Option<BreachDetails>,
    /// Post-run analysis
    pub analysis: String,
}

// ============================================================================
// CANONICAL EXPERIMENTS
// ============================================================================

/// The five pre-registered experiments
pub fn canonical_experiments() -> Vec<ChaosExperiment> {
    vec![
        ChaosExperiment {
            id: "CEP-001".to_string(),
            target: TARGET_FEDERATED_MEMORY.to_string(),
            hazard: "l2_latency".to_string(),
            parameters: json!({ "latencyMs": 200 }),
            steady_state_metric: METRIC_P99_QUERY_LATENCY.to_string(),
            metric_kind: MetricKind::LatencyLike,
            success_threshold: 1.1,
            hypothesis: "L1 absorbs hot-path reads, so injected L2 latency leaves hybrid query p99 within 10% of baseline".to_string(),
            duration: Duration::from_secs(60),
        },
        ChaosExperiment {
            id: "CEP-002".to_string(),
            target: TARGET_OUTBOX.to_string(),
            hazard: "poison_message".to_string(),
            parameters: json!({ "count": 1 }),
            steady_state_metric: METRIC_REPLICATION_LAG.to_string(),
            metric_kind: MetricKind::LatencyLike,
            success_threshold: 2.0,
            hypothesis: "poison messages are quarantined in dead-letter without stalling the drain loop".to_string(),
            duration: Duration::from_secs(60),
        },
        ChaosExperiment {
            id: "CEP-003".to_string(),
            target: TARGET_TRANSDUCER.to_string(),
            hazard: "schema_violation".to_string(),
            parameters: json!({ "mode": "drop_properties" }),
            steady_state_metric: METRIC_SCHEMA_ADHERENCE.to_string(),
            metric_kind: MetricKind::Ratio,
            success_threshold: 0.9,
            hypothesis: "schema validation with repair keeps delivered adherence at or above 90% under injected violations".to_string(),
            duration: Duration::from_secs(60),
        },
        ChaosExperiment {
            id: "CEP-004".to_string(),
            target: TARGET_HRC.to_string(),
            hazard: "operator_tie".to_string(),
            parameters: json!({ "cycles": 5 }),
            steady_state_metric: METRIC_REASONING_ACCURACY.to_string(),
            metric_kind: MetricKind::Ratio,
            success_threshold: 0.7,
            hypothesis: "tie impasses resolve through subgoaling, keeping reasoning accuracy above 70%".to_string(),
            duration: Duration::from_secs(60),
        },
        ChaosExperiment {
            id: "CEP-005".to_string(),
            target: TARGET_FEDERATED_MEMORY.to_string(),
            hazard: "memory_pressure".to_string(),
            parameters: json!({ "entries": 2000, "entryBytes": 512 }),
            steady_state_metric: METRIC_MEMORY_USAGE.to_string(),
            metric_kind: MetricKind::LatencyLike,
            success_threshold: 1.5,
            hypothesis: "tier eviction bounds resident memory under cache flooding".to_string(),
            duration: Duration::from_secs(60),
        },
    ]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_canonical_experiments() {
        let experiments = canonical_experiments();
        assert_eq!(experiments.len(), 5);

        let ids: Vec<&str> = experiments.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["CEP-001", "CEP-002", "CEP-003", "CEP-004", "CEP-005"]);
    }

    #[test]
    fn test_ratio_metrics_use_ratio_rule() {
        for experiment in canonical_experiments() {
            let is_ratio = matches!(
                experiment.steady_state_metric.as_str(),
                METRIC_SCHEMA_ADHERENCE | METRIC_REASONING_ACCURACY
            );
            assert_eq!(is_ratio, experiment.metric_kind == MetricKind::Ratio);
        }
    }

    #[test]
    fn test_experiment_serde_roundtrip() {
        let experiment = canonical_experiments().remove(0);
        let json = serde_json::to_string(&experiment).unwrap();
        let back: ChaosExperiment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, experiment.id);
        assert_eq!(back.duration, experiment.duration);
    }
}
