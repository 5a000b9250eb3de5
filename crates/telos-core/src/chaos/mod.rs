//! Chaos Conductor
//!
//! Hypothesis-driven fault injection with steady-state monitoring. Five
//! canonical experiments cover L2 latency, outbox poison messages,
//! transducer schema violations, HRC operator-tie storms and memory
//! pressure. The validation gauntlet runs every registered experiment
//! sequentially and reports the aggregate success rate.

mod conductor;
mod experiment;
mod metrics;
mod targets;

pub use conductor::{ChaosConductor, ChaosConfig, ChaosError, GauntletReport};
pub use experiment::{
    canonical_experiments, BreachDetails, ChaosExperiment, ExperimentOutcome, ExperimentOverrides,
    ExperimentRecord, InstanceStatus, MetricKind, TARGET_FEDERATED_MEMORY, TARGET_HRC,
    TARGET_OUTBOX, TARGET_TRANSDUCER,
};
pub use metrics::{
    FabricReplicationMetrics, HrcMetrics, MetricProvider, MetricRegistry, OsMetrics,
    TelemetryMetrics, TransducerMetrics, DEFAULT_MEMORY_USAGE_BYTES, DEFAULT_P99_LATENCY_MS,
    DEFAULT_REPLICATION_LAG_S, METRIC_MEMORY_USAGE, METRIC_P99_QUERY_LATENCY,
    METRIC_REASONING_ACCURACY, METRIC_REPLICATION_LAG, METRIC_SCHEMA_ADHERENCE,
};
pub use targets::{FabricTarget, HazardTarget, HrcTarget, OutboxTarget, TransducerTarget};
