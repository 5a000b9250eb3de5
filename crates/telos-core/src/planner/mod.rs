//! Active-Inference Planner
//!
//! Scores candidate action sequences by Expected Free Energy over the
//! generative world model and learns transition, causal and observation
//! parameters from observed outcomes. The model sits behind a read-write
//! lock: planning reads, learning writes.

mod efe;
mod policy;
mod world_model;

pub use efe::{
    evaluate_policy, outcome_distribution, policy_confidence, PolicyEvaluation, PredictedOutcome,
    GOAL_PRECISION,
};
pub use policy::{
    generate_candidates, is_applicable, Goal, PlanningConstraints, Policy, PolicyExecution,
};
pub use world_model::{
    ActionModel, CausalEdgeStat, CausalInfluence, CausalModel, LearningEvent, ObservationModel,
    TransitionModel, VariableRange, WorldModel, WorldModelState, CAUSAL_DAMPING,
    CAUSAL_LEARNING_RATE, HISTORY_LIMIT, PRECISION_BOUNDS, TRANSITION_LEARNING_RATE,
    TRANSITION_PROB_BOUNDS,
};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Planner error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// No applicable action produced a candidate policy
    #[error("No candidate policies for goal '{0}'")]
    NoCandidates(String),
    /// Snapshot IO failure
    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot (de)serialization failure
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Lock poisoned by a panicking holder
    #[error("World model lock poisoned")]
    LockPoisoned,
}

/// Planner result type
pub type Result<T> = std::result::Result<T, PlannerError>;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Result of one planning request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    /// The winning policy
    pub policy: Policy,
    /// Its Expected Free Energy
    pub expected_free_energy: f64,
    /// Most probable outcome of the final step
    pub predicted_outcome: PredictedOutcome,
    /// Confidence in the plan, [0, 1]
    pub confidence: f64,
    /// Full scoring detail
    pub evaluation: PolicyEvaluation,
}

/// Causal observation accompanying an outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalObservation {
    /// Cause phenomenon
    pub cause: String,
    /// Effect phenomenon
    pub effect: String,
    /// Observed strength in [0, 1]
    pub strength: f64,
    /// Temporal delay, when measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
}

/// One observed `(action, outcome)` pair fed back into the model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedOutcome {
    /// The executed action
    pub action: String,
    /// Whether it succeeded
    pub success: bool,
    /// Measured variable deltas
    #[serde(default)]
    pub observed_effects: BTreeMap<String, f64>,
    /// Causal structure revealed by the outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causal: Option<CausalObservation>,
}

// ============================================================================
// PLANNER
// ============================================================================

/// Planner over a lock-guarded world model
pub struct ActiveInferencePlanner {
    model: RwLock<WorldModel>,
}

impl Default for ActiveInferencePlanner {
    fn default() -> Self {
        Self::new(WorldModel::with_default_actions())
    }
}

impl ActiveInferencePlanner {
    /// Create a planner over the given model
    pub fn new(model: WorldModel) -> Self {
        Self {
            model: RwLock::new(model),
        }
    }

    /// Snapshot of the model's current believed state
    pub fn current_state(&self) -> Result<WorldModelState> {
        let model = self.model.read().map_err(|_| PlannerError::LockPoisoned)?;
        Ok(model.state.clone())
    }

    /// Full model snapshot (tests and the world-model snapshotter)
    pub fn model_snapshot(&self) -> Result<WorldModel> {
        let model = self.model.read().map_err(|_| PlannerError::LockPoisoned)?;
        Ok(model.clone())
    }

    /// Plan from an explicit state: generate candidates, score each by EFE,
    /// return the minimum. Pure with respect to the model snapshot.
    pub fn plan(
        &self,
        goal: &Goal,
        current_state: &WorldModelState,
        constraints: &PlanningConstraints,
    ) -> Result<PlanOutcome> {
        let model = self.model.read().map_err(|_| PlannerError::LockPoisoned)?;

        let candidates = generate_candidates(&model, current_state, goal, constraints);
        if candidates.is_empty() {
            return Err(PlannerError::NoCandidates(goal.name.clone()));
        }

        let mut best: Option<PolicyEvaluation> = None;
        for candidate in &candidates {
            let evaluation = evaluate_policy(&model, candidate, current_state, goal);
            let better = match &best {
                Some(current) => {
                    evaluation.expected_free_energy < current.expected_free_energy
                        || (evaluation.expected_free_energy == current.expected_free_energy
                            && evaluation.actions < current.actions)
                }
                None => true,
            };
            if better {
                best = Some(evaluation);
            }
        }

        let evaluation = best.expect("candidates checked non-empty");
        let confidence =
            policy_confidence(evaluation.expected_free_energy, evaluation.actions.len());

        debug!(
            goal = %goal.name,
            policy = ?evaluation.actions,
            efe = evaluation.expected_free_energy,
            confidence,
            "plan selected"
        );

        Ok(PlanOutcome {
            policy: Policy::new(goal.name.clone(), evaluation.actions.clone()),
            expected_free_energy: evaluation.expected_free_energy,
            predicted_outcome: evaluation.predicted_outcome,
            confidence,
            evaluation,
        })
    }

    /// Plan from the model's own believed state
    pub fn plan_current(&self, goal: &Goal, constraints: &PlanningConstraints) -> Result<PlanOutcome> {
        let state = self.current_state()?;
        self.plan(goal, &state, constraints)
    }

    /// Fold one observed outcome back into the model:
    /// - transition probability toward 1 (success) or 0 (failure)
    /// - modelled effect magnitudes toward observed magnitudes
    /// - the causal graph edge, with its temporal index when delayed
    /// - observation precision up on small error, down on large
    /// - believed state nudged by the observed deltas
    pub fn learn_from_outcome(&self, outcome: &ObservedOutcome) -> Result<()> {
        let mut model = self.model.write().map_err(|_| PlannerError::LockPoisoned)?;

        let (lo, hi) = TRANSITION_PROB_BOUNDS;
        if let Some(action) = model.transitions.get_mut(&outcome.action) {
            let target = if outcome.success { 1.0 } else { 0.0 };
            action.base_probability = (action.base_probability
                + TRANSITION_LEARNING_RATE * (target - action.base_probability))
                .clamp(lo, hi);

            for (variable, observed) in &outcome.observed_effects {
                let modelled = action.effects.entry(variable.clone()).or_insert(0.0);
                *modelled += TRANSITION_LEARNING_RATE * (observed - *modelled);
            }
        }

        // Precision follows prediction error per observed variable
        let errors: Vec<(String, f64)> = outcome
            .observed_effects
            .iter()
            .filter_map(|(variable, observed)| {
                model
                    .transitions
                    .get(&outcome.action)
                    .and_then(|a| a.effects.get(variable))
                    .map(|modelled| (variable.clone(), (observed - modelled).abs()))
            })
            .collect();
        for (variable, error) in errors {
            if error < 0.1 {
                model.observation.adjust(&variable, 0.1);
            } else if error > 0.3 {
                model.observation.adjust(&variable, -0.1);
            }
        }

        if let Some(causal) = &outcome.causal {
            model
                .causal
                .observe_edge(&causal.cause, &causal.effect, causal.strength, causal.delay);
        }

        for (variable, delta) in &outcome.observed_effects {
            model.state.nudge(variable, *delta);
        }

        model.push_history(LearningEvent {
            action: outcome.action.clone(),
            success: outcome.success,
            at: Utc::now(),
        });

        Ok(())
    }

    /// Write the model snapshot to `path` (atomic write-then-rename)
    pub fn snapshot_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let serialized = {
            let model = self.model.read().map_err(|_| PlannerError::LockPoisoned)?;
            serde_json::to_string_pretty(&*model)?
        };
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a model snapshot from `path`
    pub fn restore_from(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let model: WorldModel = serde_json::from_str(&raw)?;
        Ok(Self::new(model))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn uncertain_state() -> WorldModelState {
        let mut state = WorldModelState::default();
        state.set("uncertainty_level", 0.85);
        state.set("working_memory_load", 0.2);
        state.set("goal_progress", 0.0);
        state
    }

    #[test]
    fn test_planner_picks_info_gathering_under_uncertainty() {
        let planner = ActiveInferencePlanner::default();
        let goal = Goal::new("resolve", 0.8);

        let outcome = planner
            .plan(&goal, &uncertain_state(), &PlanningConstraints::default())
            .unwrap();

        assert_eq!(
            outcome.policy.actions,
            vec![
                "gather_information".to_string(),
                "apply_strategy".to_string()
            ]
        );
        assert!(outcome.confidence > 0.5);
    }

    #[test]
    fn test_plan_is_pure_function_of_snapshot() {
        let planner = ActiveInferencePlanner::default();
        let goal = Goal::new("g", 0.8);
        let state = uncertain_state();

        let a = planner
            .plan(&goal, &state, &PlanningConstraints::default())
            .unwrap();
        let b = planner
            .plan(&goal, &state, &PlanningConstraints::default())
            .unwrap();

        assert_eq!(a.expected_free_energy, b.expected_free_energy);
        assert_eq!(a.policy.actions, b.policy.actions);
    }

    #[test]
    fn test_empty_model_yields_no_candidates() {
        let planner = ActiveInferencePlanner::new(WorldModel::new());
        let err = planner
            .plan(
                &Goal::new("g", 0.5),
                &WorldModelState::default(),
                &PlanningConstraints::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PlannerError::NoCandidates(_)));
    }

    #[test]
    fn test_learning_moves_transition_probability() {
        let planner = ActiveInferencePlanner::default();
        let before = planner
            .model_snapshot()
            .unwrap()
            .transitions
            .get("apply_strategy")
            .unwrap()
            .base_probability;

        planner
            .learn_from_outcome(&ObservedOutcome {
                action: "apply_strategy".to_string(),
                success: false,
                observed_effects: BTreeMap::new(),
                causal: None,
            })
            .unwrap();

        let after = planner
            .model_snapshot()
            .unwrap()
            .transitions
            .get("apply_strategy")
            .unwrap()
            .base_probability;

        assert!((after - (before + TRANSITION_LEARNING_RATE * (0.0 - before))).abs() < 1e-9);
    }

    #[test]
    fn test_learning_clamps_probability() {
        let planner = ActiveInferencePlanner::default();
        for _ in 0..200 {
            planner
                .learn_from_outcome(&ObservedOutcome {
                    action: "apply_strategy".to_string(),
                    success: false,
                    observed_effects: BTreeMap::new(),
                    causal: None,
                })
                .unwrap();
        }
        let p = planner
            .model_snapshot()
            .unwrap()
            .transitions
            .get("apply_strategy")
            .unwrap()
            .base_probability;
        assert!((p - TRANSITION_PROB_BOUNDS.0).abs() < 1e-9);
    }

    #[test]
    fn test_learning_updates_effects_and_causal_graph() {
        let planner = ActiveInferencePlanner::default();
        planner
            .learn_from_outcome(&ObservedOutcome {
                action: "gather_information".to_string(),
                success: true,
                observed_effects: [("uncertainty_level".to_string(), -0.4)]
                    .into_iter()
                    .collect(),
                causal: Some(CausalObservation {
                    cause: "gather_information".to_string(),
                    effect: "uncertainty_drop".to_string(),
                    strength: 0.9,
                    delay: Some(1),
                }),
            })
            .unwrap();

        let model = planner.model_snapshot().unwrap();
        let effect = model
            .transitions
            .get("gather_information")
            .unwrap()
            .effects
            .get("uncertainty_level")
            .copied()
            .unwrap();
        // -0.3 nudged toward -0.4
        assert!(effect < -0.3);

        assert!(model
            .causal
            .edge("gather_information", "uncertainty_drop")
            .is_some());
        assert!(model
            .causal
            .temporal_edge("gather_information", "uncertainty_drop", 1)
            .is_some());
        assert_eq!(model.history.len(), 1);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world_model.json");

        let planner = ActiveInferencePlanner::default();
        planner
            .learn_from_outcome(&ObservedOutcome {
                action: "apply_strategy".to_string(),
                success: true,
                observed_effects: BTreeMap::new(),
                causal: None,
            })
            .unwrap();
        planner.snapshot_to(&path).unwrap();

        let restored = ActiveInferencePlanner::restore_from(&path).unwrap();
        assert_eq!(
            planner.model_snapshot().unwrap(),
            restored.model_snapshot().unwrap()
        );
    }
}
