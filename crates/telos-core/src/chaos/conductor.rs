//! The Chaos Conductor - hypothesis-driven fault injection
//!
//! Lifecycle per run: establish a baseline (mean of repeated samples),
//! inject the hazard through the target, monitor the steady-state metric
//! for the experiment duration, restore the target, classify the outcome
//! and append exactly one history record. Failed or errored experiments
//! revealed a weakness: a learning query goes to the HRC tagged with the
//! experiment id and failure mode.
//!
//! Injected faults are never system errors; target-side failures are
//! swallowed into the experiment analysis.

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::hrc::HrcController;

use super::experiment::{
    canonical_experiments, BreachDetails, ChaosExperiment, ExperimentOutcome, ExperimentOverrides,
    ExperimentRecord, InstanceStatus, MetricKind,
};
use super::metrics::MetricRegistry;
use super::targets::HazardTarget;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Conductor error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ChaosError {
    /// Unknown experiment id; an input error, never retried
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),
    /// The experiment id is already running
    #[error("Experiment already running: {0}")]
    AlreadyRunning(String),
    /// No target registered under the experiment's target name
    #[error("No hazard target registered for '{0}'")]
    NoTarget(String),
    /// The target rejected the hazard
    #[error("Target '{target}' rejected hazard '{hazard}'")]
    InjectionRejected {
        /// Rejecting target
        target: String,
        /// Rejected hazard
        hazard: String,
    },
    /// Injection failed for another reason
    #[error("Hazard injection failed: {0}")]
    Injection(String),
    /// History log IO failure
    #[error("Experiment log error: {0}")]
    Io(#[from] std::io::Error),
    /// Record (de)serialization failure
    #[error("Experiment codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Lock poisoned by a panicking holder
    #[error("Conductor lock poisoned")]
    LockPoisoned,
}

/// Conductor result type
pub type Result<T> = std::result::Result<T, ChaosError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Conductor timing parameters; tests shrink these to milliseconds
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Samples taken to establish the baseline
    pub baseline_samples: u32,
    /// Pause between baseline samples
    pub baseline_interval: Duration,
    /// Pause between steady-state checks
    pub steady_state_check_interval: Duration,
    /// Hard bound on one experiment's total wall-clock
    pub experiment_timeout: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            baseline_samples: 6,
            baseline_interval: Duration::from_secs(2),
            steady_state_check_interval: Duration::from_secs(10),
            experiment_timeout: Duration::from_secs(300),
        }
    }
}

/// Gauntlet summary
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GauntletReport {
    /// Experiments run
    pub total: usize,
    /// Experiments that passed
    pub passed: usize,
    /// passed / total
    pub success_rate: f64,
    /// Per-experiment records, in run order
    pub results: Vec<ExperimentRecord>,
}

// ============================================================================
// CONDUCTOR
// ============================================================================

/// Orchestrates chaos experiments over registered targets and metrics
pub struct ChaosConductor {
    config: ChaosConfig,
    experiments: Mutex<BTreeMap<String, ChaosExperiment>>,
    targets: Mutex<BTreeMap<String, Arc<dyn HazardTarget>>>,
    metrics: MetricRegistry,
    active: Mutex<HashSet<String>>,
    history: Mutex<Vec<ExperimentRecord>>,
    log_path: PathBuf,
    hrc: Option<Arc<HrcController>>,
}

impl ChaosConductor {
    /// Create a conductor with the canonical experiments pre-registered.
    /// `log_path` is the append-only `experiments.log`.
    pub fn new(
        config: ChaosConfig,
        metrics: MetricRegistry,
        log_path: impl AsRef<Path>,
        hrc: Option<Arc<HrcController>>,
    ) -> Self {
        let experiments = canonical_experiments()
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        Self {
            config,
            experiments: Mutex::new(experiments),
            targets: Mutex::new(BTreeMap::new()),
            metrics,
            active: Mutex::new(HashSet::new()),
            history: Mutex::new(Vec::new()),
            log_path: log_path.as_ref().to_path_buf(),
            hrc,
        }
    }

    /// Register a hazard target
    pub fn register_target(&self, target: Arc<dyn HazardTarget>) {
        if let Ok(mut targets) = self.targets.lock() {
            targets.insert(target.name().to_string(), target);
        }
    }

    /// Register (or replace) an experiment
    pub fn register_experiment(&self, experiment: ChaosExperiment) {
        if let Ok(mut experiments) = self.experiments.lock() {
            experiments.insert(experiment.id.clone(), experiment);
        }
    }

    /// Registered experiment ids, in deterministic order
    pub fn experiment_ids(&self) -> Vec<String> {
        self.experiments
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent `limit` history records, newest last
    pub fn experiment_history(&self, limit: usize) -> Vec<ExperimentRecord> {
        let history = match self.history.lock() {
            Ok(h) => h,
            Err(_) => return Vec::new(),
        };
        let skip = history.len().saturating_sub(limit);
        history[skip..].to_vec()
    }

    /// Run one experiment to completion; exactly one record is appended
    /// regardless of outcome. Same-id experiments never run concurrently.
    pub async fn start_experiment(
        &self,
        id: &str,
        overrides: ExperimentOverrides,
    ) -> Result<ExperimentRecord> {
        let mut experiment = {
            let experiments = self.experiments.lock().map_err(|_| ChaosError::LockPoisoned)?;
            experiments
                .get(id)
                .cloned()
                .ok_or_else(|| ChaosError::UnknownExperiment(id.to_string()))?
        };
        if let Some(duration) = overrides.duration {
            experiment.duration = duration;
        }
        if let Some(threshold) = overrides.success_threshold {
            experiment.success_threshold = threshold;
        }
        if let Some(parameters) = overrides.parameters {
            experiment.parameters = parameters;
        }

        {
            let mut active = self.active.lock().map_err(|_| ChaosError::LockPoisoned)?;
            if !active.insert(id.to_string()) {
                return Err(ChaosError::AlreadyRunning(id.to_string()));
            }
        }

        let started_at = Utc::now();
        let run = tokio::time::timeout(
            self.config.experiment_timeout,
            self.run_lifecycle(&experiment),
        )
        .await;

        {
            let mut active = self.active.lock().map_err(|_| ChaosError::LockPoisoned)?;
            active.remove(id);
        }

        let (baseline, outcome, breach, analysis) = match run {
            Ok(result) => result,
            Err(_) => {
                // Timed out mid-lifecycle; make sure the target is restored
                self.try_restore(&experiment).await;
                (
                    None,
                    ExperimentOutcome::Error,
                    None,
                    format!(
                        "experiment aborted after exceeding the {}s timeout",
                        self.config.experiment_timeout.as_secs()
                    ),
                )
            }
        };

        let record = ExperimentRecord {
            run_id: Uuid::new_v4().to_string(),
            experiment_id: experiment.id.clone(),
            started_at,
            finished_at: Utc::now(),
            baseline,
            outcome,
            breach,
            analysis,
        };

        self.append_record(&record)?;

        if matches!(
            record.outcome,
            ExperimentOutcome::Failed | ExperimentOutcome::Error
        ) {
            let failure_mode = record
                .breach
                .as_ref()
                .map(|b| b.kind.clone())
                .unwrap_or_else(|| "lifecycle_error".to_string());
            if let Some(hrc) = &self.hrc {
                hrc.enqueue_learning_query(&record.experiment_id, &failure_mode);
            }
        }

        info!(
            experiment = %record.experiment_id,
            outcome = ?record.outcome,
            "experiment complete"
        );
        Ok(record)
    }

    /// Run every registered experiment sequentially
    pub async fn run_validation_gauntlet(&self) -> Result<GauntletReport> {
        let ids = self.experiment_ids();
        let mut results = Vec::with_capacity(ids.len());

        for id in &ids {
            // Status comes from the returned history record: the active
            // slot is already cleared by the time a run finishes.
            let record = self
                .start_experiment(id, ExperimentOverrides::default())
                .await?;
            results.push(record);
        }

        let passed = results
            .iter()
            .filter(|r| r.outcome == ExperimentOutcome::Passed)
            .count();
        let total = results.len();

        Ok(GauntletReport {
            total,
            passed,
            success_rate: if total == 0 {
                1.0
            } else {
                passed as f64 / total as f64
            },
            results,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    async fn run_lifecycle(
        &self,
        experiment: &ChaosExperiment,
    ) -> (
        Option<f64>,
        ExperimentOutcome,
        Option<BreachDetails>,
        String,
    ) {
        // Phase 1: baseline
        let mut samples = Vec::with_capacity(self.config.baseline_samples as usize);
        for i in 0..self.config.baseline_samples {
            if let Some(value) = self.metrics.sample(&experiment.steady_state_metric) {
                samples.push(value);
            }
            if i + 1 < self.config.baseline_samples {
                tokio::time::sleep(self.config.baseline_interval).await;
            }
        }
        if samples.is_empty() {
            return (
                None,
                ExperimentOutcome::Error,
                None,
                format!(
                    "baseline unavailable: no provider answered for '{}'",
                    experiment.steady_state_metric
                ),
            );
        }
        let baseline = samples.iter().sum::<f64>() / samples.len() as f64;

        // Phase 2: injection
        let mut status = InstanceStatus::Injecting;
        info!(experiment = %experiment.id, status = ?status, baseline, "baseline established");
        let target = {
            let targets = match self.targets.lock() {
                Ok(t) => t,
                Err(_) => {
                    return (
                        Some(baseline),
                        ExperimentOutcome::Error,
                        None,
                        "target registry lock poisoned".to_string(),
                    )
                }
            };
            targets.get(&experiment.target).cloned()
        };
        let Some(target) = target else {
            return (
                Some(baseline),
                ExperimentOutcome::Error,
                None,
                format!("no hazard target registered for '{}'", experiment.target),
            );
        };

        if let Err(e) = target
            .inject(&experiment.hazard, &experiment.parameters)
            .await
        {
            self.try_restore(experiment).await;
            return (
                Some(baseline),
                ExperimentOutcome::Error,
                None,
                format!("hazard injection rejected: {e}"),
            );
        }

        // Phase 3: monitoring
        status = InstanceStatus::Monitoring;
        let monitor_started = Instant::now();
        let mut breach: Option<BreachDetails> = None;

        while monitor_started.elapsed() < experiment.duration {
            let remaining = experiment.duration.saturating_sub(monitor_started.elapsed());
            tokio::time::sleep(remaining.min(self.config.steady_state_check_interval)).await;

            let current = self.metrics.sample(&experiment.steady_state_metric);
            let observed_breach = match (current, experiment.metric_kind) {
                (None, _) => Some(BreachDetails {
                    metric: experiment.steady_state_metric.clone(),
                    kind: "metric_unavailable".to_string(),
                    baseline,
                    observed: None,
                    at: Utc::now(),
                }),
                (Some(value), MetricKind::LatencyLike)
                    if value > baseline * experiment.success_threshold =>
                {
                    Some(BreachDetails {
                        metric: experiment.steady_state_metric.clone(),
                        kind: "threshold_exceeded".to_string(),
                        baseline,
                        observed: Some(value),
                        at: Utc::now(),
                    })
                }
                (Some(value), MetricKind::Ratio)
                    if value < experiment.success_threshold =>
                {
                    Some(BreachDetails {
                        metric: experiment.steady_state_metric.clone(),
                        kind: "below_threshold".to_string(),
                        baseline,
                        observed: Some(value),
                        at: Utc::now(),
                    })
                }
                _ => None,
            };

            if let Some(details) = observed_breach {
                status = InstanceStatus::SteadyStateBreached;
                breach = Some(details);
                break;
            }
        }

        // Phase 4: restore and classify
        self.try_restore(experiment).await;

        match (status, breach) {
            (InstanceStatus::SteadyStateBreached, Some(details)) => {
                let analysis = format!(
                    "steady state breached: {} ({} vs baseline {:.3})",
                    details.metric,
                    details
                        .observed
                        .map(|v| format!("{v:.3}"))
                        .unwrap_or_else(|| "unavailable".to_string()),
                    details.baseline
                );
                (
                    Some(baseline),
                    ExperimentOutcome::Failed,
                    Some(details),
                    analysis,
                )
            }
            _ => (
                Some(baseline),
                ExperimentOutcome::Passed,
                None,
                format!(
                    "hypothesis held: '{}' stayed steady for {:.1}s",
                    experiment.steady_state_metric,
                    experiment.duration.as_secs_f64()
                ),
            ),
        }
    }

    async fn try_restore(&self, experiment: &ChaosExperiment) {
        let target = self
            .targets
            .lock()
            .ok()
            .and_then(|t| t.get(&experiment.target).cloned());
        if let Some(target) = target {
            if let Err(e) = target.restore().await {
                warn!(target = %experiment.target, error = %e, "target restore failed");
            }
        }
    }

    fn append_record(&self, record: &ExperimentRecord) -> Result<()> {
        {
            let mut history = self.history.lock().map_err(|_| ChaosError::LockPoisoned)?;
            history.push(record.clone());
        }
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(log, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
